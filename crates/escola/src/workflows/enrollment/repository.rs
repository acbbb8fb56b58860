use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{
    AlunoId, AlunoSubmission, AnoLectivo, AnoLectivoId, Classe, ClasseId, Contacto, ContactOwner,
    CursoId, EnrollmentConfirmation, MatriculaId, MetodoPagamentoId, ResponsavelSubmission, Sala,
    SalaId, Turma, TurmaId, TurnoId,
};
use super::rejection::{ContactField, FieldPath};

/// Error enumeration for store failures. Absence is never an error here.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),
    /// A contact write hit the unique index on phone or e-mail.
    #[error("{} already stored for another row", .0.label())]
    ContactTaken(ContactField),
}

/// Reference tables that support plain id lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Classe,
    Turma,
    Turno,
    MetodoPagamento,
    Parentesco,
    Curso,
    Disciplina,
    Sala,
    AnoLectivo,
}

impl CatalogKind {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Classe => "classes",
            Self::Turma => "turmas",
            Self::Turno => "turnos",
            Self::MetodoPagamento => "metodos_pagamento",
            Self::Parentesco => "parentescos",
            Self::Curso => "cursos",
            Self::Disciplina => "disciplinas",
            Self::Sala => "salas",
            Self::AnoLectivo => "anos_lectivos",
        }
    }
}

/// Catalogs whose natural key is the name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedCatalog {
    Turno,
    MetodoPagamento,
    Parentesco,
    Curso,
    Disciplina,
    Sala,
    AnoLectivo,
}

impl NamedCatalog {
    pub const fn kind(self) -> CatalogKind {
        match self {
            Self::Turno => CatalogKind::Turno,
            Self::MetodoPagamento => CatalogKind::MetodoPagamento,
            Self::Parentesco => CatalogKind::Parentesco,
            Self::Curso => CatalogKind::Curso,
            Self::Disciplina => CatalogKind::Disciplina,
            Self::Sala => CatalogKind::Sala,
            Self::AnoLectivo => CatalogKind::AnoLectivo,
        }
    }
}

/// Natural key used to find a catalog row without knowing its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogKey {
    Classe {
        nome: String,
        curso_id: CursoId,
        ano_lectivo_id: AnoLectivoId,
    },
    Turma {
        nome: String,
        classe_id: ClasseId,
        sala_id: SalaId,
        turno_id: TurnoId,
    },
    Named {
        catalog: NamedCatalog,
        nome: String,
    },
}

impl CatalogKey {
    pub fn kind(&self) -> CatalogKind {
        match self {
            Self::Classe { .. } => CatalogKind::Classe,
            Self::Turma { .. } => CatalogKind::Turma,
            Self::Named { catalog, .. } => catalog.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub kind: CatalogKind,
    pub id: i64,
    pub nome: String,
}

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn exists(&self, kind: CatalogKind, id: i64) -> Result<bool, RepositoryError>;
    async fn find_by_unique_key(
        &self,
        key: &CatalogKey,
    ) -> Result<Option<CatalogEntry>, RepositoryError>;
}

/// Phone/e-mail collision checks. `exclude` skips the owner's own row on updates.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn is_phone_taken(
        &self,
        owner: ContactOwner,
        telefone: &str,
        exclude: Option<i64>,
    ) -> Result<bool, RepositoryError>;
    async fn is_email_taken(
        &self,
        owner: ContactOwner,
        email: &str,
        exclude: Option<i64>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AlunoRepository: Send + Sync {
    async fn aluno_exists(&self, id: AlunoId) -> Result<bool, RepositoryError>;
    async fn is_document_taken(&self, numero_bi: &str) -> Result<bool, RepositoryError>;
    /// Guardians already stored for the student.
    async fn count_guardians(&self, id: AlunoId) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait ClasseRepository: Send + Sync {
    async fn find_classe(&self, id: ClasseId) -> Result<Option<Classe>, RepositoryError>;
}

#[async_trait]
pub trait TurmaRepository: Send + Sync {
    async fn find_turma(&self, id: TurmaId) -> Result<Option<Turma>, RepositoryError>;
}

#[async_trait]
pub trait SalaRepository: Send + Sync {
    async fn find_sala(&self, id: SalaId) -> Result<Option<Sala>, RepositoryError>;
}

#[async_trait]
pub trait MatriculaRepository: Send + Sync {
    async fn count_in_turma(
        &self,
        classe_id: ClasseId,
        turma_id: TurmaId,
    ) -> Result<u32, RepositoryError>;
    async fn exists_for(
        &self,
        aluno_id: AlunoId,
        classe_id: ClasseId,
        ano_lectivo_id: AnoLectivoId,
    ) -> Result<bool, RepositoryError>;
    async fn find_confirmation(
        &self,
        id: MatriculaId,
    ) -> Result<Option<EnrollmentConfirmation>, RepositoryError>;
}

#[async_trait]
pub trait AnoLectivoRepository: Send + Sync {
    async fn active(&self) -> Result<Option<AnoLectivo>, RepositoryError>;
}

/// Everything written by one successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentDraft {
    pub aluno: AlunoSubmission,
    pub responsaveis: Vec<ResponsavelSubmission>,
    pub classe_id: ClasseId,
    pub turma_id: TurmaId,
    pub metodo_pagamento_id: MetodoPagamentoId,
    pub ano_lectivo_id: AnoLectivoId,
    pub data_matricula: NaiveDate,
}

/// Failures raised inside the enrollment transaction. The transaction is rolled back.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("turma {turma_id} filled up before commit ({ocupacao}/{capacidade})")]
    CapacityExceeded {
        turma_id: TurmaId,
        capacidade: u32,
        ocupacao: u32,
    },
    #[error("unique constraint violated on {0}")]
    Conflict(FieldPath),
    #[error("classe {0} disappeared before commit")]
    ClasseMissing(ClasseId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Atomic writer for aluno, responsaveis, matricula and pagamento rows.
#[async_trait]
pub trait EnrollmentLedger: Send + Sync {
    async fn commit(&self, draft: EnrollmentDraft)
        -> Result<EnrollmentConfirmation, CommitError>;
}

/// Contact writes for students, guardians and teachers. `update_contact`
/// reports a lost uniqueness race as [`RepositoryError::ContactTaken`].
#[async_trait]
pub trait ContactRegistry: Send + Sync {
    async fn owner_exists(&self, owner: ContactOwner, id: i64) -> Result<bool, RepositoryError>;
    async fn update_contact(
        &self,
        owner: ContactOwner,
        id: i64,
        contacto: &Contacto,
    ) -> Result<(), RepositoryError>;
}

/// Full data-access surface required by the HTTP services.
pub trait SchoolStore:
    CatalogLookup
    + ContactDirectory
    + AlunoRepository
    + ClasseRepository
    + TurmaRepository
    + SalaRepository
    + MatriculaRepository
    + AnoLectivoRepository
    + EnrollmentLedger
    + ContactRegistry
{
}

impl<T> SchoolStore for T where
    T: CatalogLookup
        + ContactDirectory
        + AlunoRepository
        + ClasseRepository
        + TurmaRepository
        + SalaRepository
        + MatriculaRepository
        + AnoLectivoRepository
        + EnrollmentLedger
        + ContactRegistry
{
}
