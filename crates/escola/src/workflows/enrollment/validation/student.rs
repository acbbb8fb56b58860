use chrono::{Datelike, NaiveDate};

use super::{email_taken, CheckResult};
use crate::workflows::enrollment::domain::{
    AlunoId, AnoLectivoId, ClasseId, ContactOwner, NovoAluno,
};
use crate::workflows::enrollment::rejection::{AgeViolation, FieldPath, Rejection};
use crate::workflows::enrollment::repository::{
    AlunoRepository, ContactDirectory, MatriculaRepository,
};
use crate::workflows::enrollment::EnrollmentPolicy;

/// Whole years elapsed between `birth` and `today`.
pub fn age_in_years(birth: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}

pub fn check_birth_date(birth: NaiveDate, today: NaiveDate, minimum: u32) -> Result<(), Rejection> {
    if birth > today {
        return Err(Rejection::AgeOutOfRange(AgeViolation::BornInFuture));
    }

    let age = age_in_years(birth, today);
    if age < minimum {
        return Err(Rejection::AgeOutOfRange(AgeViolation::BelowMinimum { age, minimum }));
    }

    Ok(())
}

pub struct StudentValidator<'a, S: ?Sized> {
    store: &'a S,
    policy: EnrollmentPolicy,
}

impl<'a, S> StudentValidator<'a, S>
where
    S: AlunoRepository + ContactDirectory + MatriculaRepository + ?Sized,
{
    pub fn new(store: &'a S, policy: EnrollmentPolicy) -> Self {
        Self { store, policy }
    }

    /// Age first, then document and contact uniqueness in one round trip.
    pub async fn validate_new(&self, aluno: &NovoAluno, today: NaiveDate) -> CheckResult {
        check_birth_date(aluno.data_nascimento, today, self.policy.minimum_aluno_age)?;

        let (bi_taken, phone_taken, email_taken) = tokio::try_join!(
            self.store.is_document_taken(aluno.numero_bi.trim()),
            self.store
                .is_phone_taken(ContactOwner::Aluno, aluno.contacto.telefone(), None),
            email_taken(self.store, ContactOwner::Aluno, aluno.contacto.email(), None),
        )?;

        if bi_taken {
            return Err(Rejection::UniquenessConflict {
                field: FieldPath::aluno("numeroBi"),
            }
            .into());
        }
        if phone_taken {
            return Err(Rejection::UniquenessConflict {
                field: FieldPath::aluno("contacto.telefone"),
            }
            .into());
        }
        if email_taken {
            return Err(Rejection::UniquenessConflict {
                field: FieldPath::aluno("contacto.email"),
            }
            .into());
        }

        Ok(())
    }

    /// A pre-registered student must exist and not already hold this enrollment.
    pub async fn validate_existing(
        &self,
        aluno_id: AlunoId,
        classe_id: ClasseId,
        ano_lectivo_id: AnoLectivoId,
    ) -> CheckResult {
        let (exists, enrolled) = tokio::try_join!(
            self.store.aluno_exists(aluno_id),
            self.store.exists_for(aluno_id, classe_id, ano_lectivo_id),
        )?;

        if !exists {
            return Err(Rejection::ReferentialNotFound {
                field: FieldPath::aluno("alunoId"),
                id: aluno_id.0,
            }
            .into());
        }
        if enrolled {
            return Err(Rejection::UniquenessConflict {
                field: FieldPath::matricula("matricula"),
            }
            .into());
        }

        Ok(())
    }
}
