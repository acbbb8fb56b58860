//! Enrollment (matrícula) validation and commit workflow.
//!
//! A submission passes the guardian contact dedup scan, the student, guardian
//! and capacity validators in that order, and is then written atomically with
//! its tuition payment through [`EnrollmentLedger`].

pub mod domain;
pub mod rejection;
pub mod repository;
pub mod router;
pub mod service;
pub mod validation;

#[cfg(test)]
pub(crate) mod tests;

/// Youngest age, in whole years, accepted for a new student.
pub const MINIMUM_ALUNO_AGE: u32 = 14;

/// Policy knobs for the enrollment workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentPolicy {
    pub minimum_aluno_age: u32,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            minimum_aluno_age: MINIMUM_ALUNO_AGE,
        }
    }
}

pub use domain::{
    AlunoId, AlunoSubmission, AnoLectivo, AnoLectivoId, Classe, ClasseId, Contacto, ContactOwner,
    EnrollmentConfirmation, EnrollmentSubmission, Endereco, Genero, MatriculaId,
    MetodoPagamentoId, NovoAluno, ParentescoId, ResponsavelSubmission, Sala, SalaId, Turma,
    TurmaId, TurmaOccupancy,
};
pub use rejection::{DataIntegrityFault, FieldPath, MalformedInput, Rejection, RejectionView};
pub use repository::{
    AlunoRepository, AnoLectivoRepository, CatalogEntry, CatalogKey, CatalogKind, CatalogLookup,
    ClasseRepository, CommitError, ContactDirectory, ContactRegistry, EnrollmentDraft,
    EnrollmentLedger, MatriculaRepository, NamedCatalog, RepositoryError, SalaRepository,
    SchoolStore, TurmaRepository,
};
pub use router::enrollment_router;
pub use service::{EnrollmentError, EnrollmentService, EnrollmentStage};
