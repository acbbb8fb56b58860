use std::sync::Arc;

use tracing::info;

use crate::workflows::enrollment::domain::{Contacto, ContactOwner};
use crate::workflows::enrollment::rejection::ContactField;
use crate::workflows::enrollment::repository::{ContactDirectory, ContactRegistry, RepositoryError};
use crate::workflows::enrollment::validation::email_taken;

/// Error raised by the contact service.
#[derive(Debug, thiserror::Error)]
pub enum ContactUpdateError {
    #[error("{} {id} not found", .owner.label())]
    NotFound { owner: ContactOwner, id: i64 },
    #[error("{} already used by another {}", .field.label(), .owner.label())]
    Conflict {
        owner: ContactOwner,
        field: ContactField,
    },
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ContactUpdateError {
    fn from(value: RepositoryError) -> Self {
        Self::Repository(value)
    }
}

pub struct ContactService<S> {
    store: Arc<S>,
}

impl<S> ContactService<S>
where
    S: ContactDirectory + ContactRegistry + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Replace the contact of `owner` row `id`, keeping its own phone/e-mail legal.
    pub async fn update(
        &self,
        owner: ContactOwner,
        id: i64,
        contacto: Contacto,
    ) -> Result<Contacto, ContactUpdateError> {
        let store = self.store.as_ref();
        let contacto = contacto.normalized();

        let (exists, phone_taken, email_taken) = tokio::try_join!(
            store.owner_exists(owner, id),
            store.is_phone_taken(owner, &contacto.telefone, Some(id)),
            email_taken(store, owner, contacto.email(), Some(id)),
        )?;

        if !exists {
            return Err(ContactUpdateError::NotFound { owner, id });
        }
        if phone_taken {
            return Err(ContactUpdateError::Conflict {
                owner,
                field: ContactField::Telefone,
            });
        }
        if email_taken {
            return Err(ContactUpdateError::Conflict {
                owner,
                field: ContactField::Email,
            });
        }

        match store.update_contact(owner, id, &contacto).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound) => return Err(ContactUpdateError::NotFound { owner, id }),
            Err(RepositoryError::ContactTaken(field)) => {
                return Err(ContactUpdateError::Conflict { owner, field })
            }
            Err(err) => return Err(err.into()),
        }

        info!(owner = owner.label(), id, "contact updated");
        Ok(contacto)
    }
}
