//! Store-backed checks run before an enrollment is committed.
//!
//! Each validator borrows only the repository traits it reads from, so the
//! workflow can be exercised against in-memory doubles.

pub mod capacity;
pub mod guardians;
pub mod student;

pub use capacity::CapacityValidator;
pub use guardians::{find_duplicate_contact, GuardianValidator};
pub use student::{age_in_years, check_birth_date, StudentValidator};

use super::domain::ContactOwner;
use super::rejection::{DataIntegrityFault, Rejection};
use super::repository::{ContactDirectory, RepositoryError};

/// Failure of a single validation stage.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Integrity(#[from] DataIntegrityFault),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type CheckResult<T = ()> = Result<T, CheckError>;

/// E-mail is optional; absent addresses never collide.
pub(crate) async fn email_taken<S>(
    store: &S,
    owner: ContactOwner,
    email: Option<&str>,
    exclude: Option<i64>,
) -> Result<bool, RepositoryError>
where
    S: ContactDirectory + ?Sized,
{
    match email {
        Some(email) => store.is_email_taken(owner, email, exclude).await,
        None => Ok(false),
    }
}
