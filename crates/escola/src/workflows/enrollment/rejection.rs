use std::fmt;

use serde::Serialize;

use super::domain::{AlunoId, AnoLectivoId, ClasseId, SalaId, TurmaId};

/// Which record a rejected field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Aluno,
    Responsavel(usize),
    Matricula,
}

/// Dotted path of the offending field, e.g. `responsaveis[1].contacto.telefone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath {
    pub scope: FieldScope,
    pub field: &'static str,
}

impl FieldPath {
    pub const fn aluno(field: &'static str) -> Self {
        Self {
            scope: FieldScope::Aluno,
            field,
        }
    }

    pub const fn responsavel(index: usize, field: &'static str) -> Self {
        Self {
            scope: FieldScope::Responsavel(index),
            field,
        }
    }

    pub const fn matricula(field: &'static str) -> Self {
        Self {
            scope: FieldScope::Matricula,
            field,
        }
    }

    pub fn guardian_index(&self) -> Option<usize> {
        match self.scope {
            FieldScope::Responsavel(index) => Some(index),
            FieldScope::Aluno | FieldScope::Matricula => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            FieldScope::Aluno => write!(f, "aluno.{}", self.field),
            FieldScope::Responsavel(index) => write!(f, "responsaveis[{index}].{}", self.field),
            FieldScope::Matricula => f.write_str(self.field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactField {
    Telefone,
    Email,
}

impl ContactField {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Telefone => "contacto.telefone",
            Self::Email => "contacto.email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeViolation {
    BornInFuture,
    BelowMinimum { age: u32, minimum: u32 },
}

impl fmt::Display for AgeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeViolation::BornInFuture => f.write_str("birth date is in the future"),
            AgeViolation::BelowMinimum { age, minimum } => {
                write!(f, "student is {age} years old, minimum is {minimum}")
            }
        }
    }
}

/// Validation outcome that ends an enrollment without touching the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("responsaveis[{first}] and responsaveis[{second}] share the same {}", .field.label())]
    DuplicateGuardianContact {
        field: ContactField,
        first: usize,
        second: usize,
    },
    #[error("{field} references a record that does not exist ({id})")]
    ReferentialNotFound { field: FieldPath, id: i64 },
    #[error("turma {turma_id} is not associated with classe {classe_id}")]
    TurmaNotInClasse {
        turma_id: TurmaId,
        classe_id: ClasseId,
    },
    #[error("classe {classe_id} does not belong to ano lectivo {ano_lectivo_id}")]
    ClasseOutsideAnoLectivo {
        classe_id: ClasseId,
        ano_lectivo_id: AnoLectivoId,
    },
    #[error("aluno {aluno_id} already has {existing} guardians, {submitted} more exceeds the limit of {maximum}")]
    GuardianLimitExceeded {
        aluno_id: AlunoId,
        existing: u32,
        submitted: usize,
        maximum: usize,
    },
    #[error("{field} is already in use")]
    UniquenessConflict { field: FieldPath },
    #[error("{0}")]
    AgeOutOfRange(AgeViolation),
    #[error("turma {turma_id} is full ({ocupacao}/{capacidade} seats taken)")]
    CapacityExceeded {
        turma_id: TurmaId,
        capacidade: u32,
        ocupacao: u32,
    },
}

impl Rejection {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateGuardianContact { .. } => "duplicate_guardian_contact",
            Self::ReferentialNotFound { .. }
            | Self::TurmaNotInClasse { .. }
            | Self::ClasseOutsideAnoLectivo { .. } => "referential_not_found",
            Self::GuardianLimitExceeded { .. } => "guardian_limit_exceeded",
            Self::UniquenessConflict { .. } => "uniqueness_conflict",
            Self::AgeOutOfRange(_) => "age_out_of_range",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
        }
    }

    pub fn field(&self) -> Option<String> {
        match self {
            Self::DuplicateGuardianContact { field, .. } => {
                Some(format!("responsaveis.{}", field.label()))
            }
            Self::ReferentialNotFound { field, .. } | Self::UniquenessConflict { field } => {
                Some(field.to_string())
            }
            Self::TurmaNotInClasse { .. } | Self::CapacityExceeded { .. } => {
                Some("turmaId".to_string())
            }
            Self::ClasseOutsideAnoLectivo { .. } => Some("classeId".to_string()),
            Self::GuardianLimitExceeded { .. } => Some("responsaveis".to_string()),
            Self::AgeOutOfRange(_) => Some("aluno.dataNascimento".to_string()),
        }
    }

    pub fn view(&self) -> RejectionView {
        let indices = match self {
            Self::DuplicateGuardianContact { first, second, .. } => Some(vec![*first, *second]),
            Self::ReferentialNotFound { field, .. } | Self::UniquenessConflict { field } => {
                field.guardian_index().map(|index| vec![index])
            }
            _ => None,
        };

        RejectionView {
            kind: self.kind(),
            field: self.field(),
            message: self.to_string(),
            indices,
        }
    }
}

/// Serialized form of a rejection returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionView {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<usize>>,
}

/// Corrupted reference data; never reported to callers as a validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataIntegrityFault {
    #[error("turma {turma_id} references sala {sala_id} which does not exist")]
    TurmaWithoutSala { turma_id: TurmaId, sala_id: SalaId },
}

/// Shape error caught before the workflow runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct MalformedInput {
    pub field: String,
    pub message: String,
}

impl MalformedInput {
    pub fn new(field: String, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn view(&self) -> RejectionView {
        RejectionView {
            kind: "malformed_input",
            field: Some(self.field.clone()),
            message: self.to_string(),
            indices: None,
        }
    }
}
