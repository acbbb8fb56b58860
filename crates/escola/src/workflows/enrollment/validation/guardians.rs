use std::collections::HashMap;

use super::{email_taken, CheckResult};
use crate::workflows::enrollment::domain::{
    AlunoId, ContactOwner, ResponsavelSubmission, MAX_RESPONSAVEIS,
};
use crate::workflows::enrollment::rejection::{ContactField, FieldPath, Rejection};
use crate::workflows::enrollment::repository::{
    AlunoRepository, CatalogKind, CatalogLookup, ContactDirectory,
};

/// In-memory scan for guardians sharing a phone or e-mail within one submission.
///
/// Phones compare after trimming; e-mails also ignore ASCII case.
pub fn find_duplicate_contact(responsaveis: &[ResponsavelSubmission]) -> Result<(), Rejection> {
    let mut phones: HashMap<&str, usize> = HashMap::new();
    let mut emails: HashMap<String, usize> = HashMap::new();

    for (index, responsavel) in responsaveis.iter().enumerate() {
        if let Some(&first) = phones.get(responsavel.contacto.telefone()) {
            return Err(Rejection::DuplicateGuardianContact {
                field: ContactField::Telefone,
                first,
                second: index,
            });
        }
        phones.insert(responsavel.contacto.telefone(), index);

        if let Some(email) = responsavel.contacto.email() {
            let key = email.to_ascii_lowercase();
            if let Some(&first) = emails.get(&key) {
                return Err(Rejection::DuplicateGuardianContact {
                    field: ContactField::Email,
                    first,
                    second: index,
                });
            }
            emails.insert(key, index);
        }
    }

    Ok(())
}

pub struct GuardianValidator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> GuardianValidator<'a, S>
where
    S: AlunoRepository + CatalogLookup + ContactDirectory + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// A returning student keeps the guardians already on file, so the cap
    /// covers stored and submitted guardians together.
    pub async fn validate_limit(&self, aluno_id: AlunoId, submitted: usize) -> CheckResult {
        if submitted == 0 {
            return Ok(());
        }

        let existing = self.store.count_guardians(aluno_id).await?;
        if existing as usize + submitted > MAX_RESPONSAVEIS {
            return Err(Rejection::GuardianLimitExceeded {
                aluno_id,
                existing,
                submitted,
                maximum: MAX_RESPONSAVEIS,
            }
            .into());
        }

        Ok(())
    }

    /// Guardians are checked in index order; the first violation wins.
    pub async fn validate_all(&self, responsaveis: &[ResponsavelSubmission]) -> CheckResult {
        for (index, responsavel) in responsaveis.iter().enumerate() {
            self.validate(index, responsavel).await?;
        }
        Ok(())
    }

    pub async fn validate(&self, index: usize, responsavel: &ResponsavelSubmission) -> CheckResult {
        let (parentesco_exists, phone_taken, email_taken) = tokio::try_join!(
            self.store
                .exists(CatalogKind::Parentesco, responsavel.parentesco_id.0),
            self.store.is_phone_taken(
                ContactOwner::Responsavel,
                responsavel.contacto.telefone(),
                None
            ),
            email_taken(
                self.store,
                ContactOwner::Responsavel,
                responsavel.contacto.email(),
                None
            ),
        )?;

        if !parentesco_exists {
            return Err(Rejection::ReferentialNotFound {
                field: FieldPath::responsavel(index, "parentescoId"),
                id: responsavel.parentesco_id.0,
            }
            .into());
        }
        if phone_taken {
            return Err(Rejection::UniquenessConflict {
                field: FieldPath::responsavel(index, "contacto.telefone"),
            }
            .into());
        }
        if email_taken {
            return Err(Rejection::UniquenessConflict {
                field: FieldPath::responsavel(index, "contacto.email"),
            }
            .into());
        }

        Ok(())
    }
}
