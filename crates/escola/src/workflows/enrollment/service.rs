use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{
    AlunoSubmission, AnoLectivo, EnrollmentConfirmation, EnrollmentSubmission, MatriculaId,
    TurmaId, TurmaOccupancy,
};
use super::rejection::{DataIntegrityFault, FieldPath, Rejection};
use super::repository::{CommitError, EnrollmentDraft, RepositoryError, SchoolStore};
use super::validation::{
    find_duplicate_contact, CapacityValidator, CheckError, GuardianValidator, StudentValidator,
};
use super::EnrollmentPolicy;

/// Linear progression of one enrollment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStage {
    Received,
    GuardianContactDedupChecked,
    StudentValidated,
    GuardiansValidated,
    CapacityValidated,
    Committed,
}

impl EnrollmentStage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::GuardianContactDedupChecked => "guardian contact dedup",
            Self::StudentValidated => "student validation",
            Self::GuardiansValidated => "guardian validation",
            Self::CapacityValidated => "capacity validation",
            Self::Committed => "commit",
        }
    }
}

/// Error raised by the enrollment service.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    /// `stage` is the stage whose check failed.
    #[error("enrollment rejected during {}: {rejection}", .stage.label())]
    Rejected {
        stage: EnrollmentStage,
        rejection: Rejection,
    },
    #[error(transparent)]
    Integrity(#[from] DataIntegrityFault),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("matricula {0} not found")]
    MatriculaNotFound(MatriculaId),
    #[error("turma {0} not found")]
    TurmaNotFound(TurmaId),
}

impl EnrollmentError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected { rejection, .. } => Some(rejection),
            _ => None,
        }
    }

    fn at(stage: EnrollmentStage) -> impl FnOnce(CheckError) -> Self {
        move |err| match err {
            CheckError::Rejected(rejection) => {
                info!(stage = stage.label(), kind = rejection.kind(), %rejection, "enrollment rejected");
                Self::Rejected { stage, rejection }
            }
            CheckError::Integrity(fault) => Self::Integrity(fault),
            CheckError::Repository(err) => Self::Repository(err),
        }
    }
}

impl From<CommitError> for EnrollmentError {
    fn from(value: CommitError) -> Self {
        let rejection = match value {
            CommitError::CapacityExceeded {
                turma_id,
                capacidade,
                ocupacao,
            } => Rejection::CapacityExceeded {
                turma_id,
                capacidade,
                ocupacao,
            },
            CommitError::Conflict(field) => Rejection::UniquenessConflict { field },
            CommitError::ClasseMissing(classe_id) => Rejection::ReferentialNotFound {
                field: FieldPath::matricula("classeId"),
                id: classe_id.0,
            },
            CommitError::Repository(err) => return Self::Repository(err),
        };
        Self::at(EnrollmentStage::Committed)(CheckError::Rejected(rejection))
    }
}

/// Service sequencing the validators and the transactional commit.
pub struct EnrollmentService<S> {
    store: Arc<S>,
    policy: EnrollmentPolicy,
}

impl<S> EnrollmentService<S>
where
    S: SchoolStore + 'static,
{
    pub fn new(store: Arc<S>, policy: EnrollmentPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> EnrollmentPolicy {
        self.policy
    }

    /// Academic year new enrollments are stamped with, if one is open.
    pub async fn active_ano_lectivo(&self) -> Result<Option<AnoLectivo>, EnrollmentError> {
        Ok(self.store.active().await?)
    }

    /// Validate and atomically store an enrollment for `ano_lectivo`.
    pub async fn enroll(
        &self,
        submission: EnrollmentSubmission,
        ano_lectivo: &AnoLectivo,
        today: NaiveDate,
    ) -> Result<EnrollmentConfirmation, EnrollmentError> {
        let store = self.store.as_ref();
        debug!(
            classe_id = %submission.classe_id,
            turma_id = %submission.turma_id,
            responsaveis = submission.responsaveis.len(),
            stage = EnrollmentStage::Received.label(),
        );

        find_duplicate_contact(&submission.responsaveis)
            .map_err(CheckError::from)
            .map_err(EnrollmentError::at(EnrollmentStage::GuardianContactDedupChecked))?;
        debug!(stage = EnrollmentStage::GuardianContactDedupChecked.label());

        let students = StudentValidator::new(store, self.policy);
        let student_check = match &submission.aluno {
            AlunoSubmission::Novo(aluno) => students.validate_new(aluno, today).await,
            AlunoSubmission::Existente { aluno_id } => {
                students
                    .validate_existing(*aluno_id, submission.classe_id, ano_lectivo.id)
                    .await
            }
        };
        student_check.map_err(EnrollmentError::at(EnrollmentStage::StudentValidated))?;
        debug!(stage = EnrollmentStage::StudentValidated.label());

        let guardians = GuardianValidator::new(store);
        if let AlunoSubmission::Existente { aluno_id } = &submission.aluno {
            guardians
                .validate_limit(*aluno_id, submission.responsaveis.len())
                .await
                .map_err(EnrollmentError::at(EnrollmentStage::GuardiansValidated))?;
        }
        guardians
            .validate_all(&submission.responsaveis)
            .await
            .map_err(EnrollmentError::at(EnrollmentStage::GuardiansValidated))?;
        debug!(stage = EnrollmentStage::GuardiansValidated.label());

        let occupancy = CapacityValidator::new(store)
            .validate(
                ano_lectivo.id,
                submission.classe_id,
                submission.turma_id,
                submission.metodo_pagamento_id,
            )
            .await
            .map_err(EnrollmentError::at(EnrollmentStage::CapacityValidated))?;
        debug!(
            stage = EnrollmentStage::CapacityValidated.label(),
            vagas = occupancy.vagas,
        );

        let draft = EnrollmentDraft {
            aluno: submission.aluno,
            responsaveis: submission.responsaveis,
            classe_id: submission.classe_id,
            turma_id: submission.turma_id,
            metodo_pagamento_id: submission.metodo_pagamento_id,
            ano_lectivo_id: ano_lectivo.id,
            data_matricula: today,
        };
        let confirmation = store.commit(draft).await?;

        info!(
            matricula_id = %confirmation.matricula_id,
            aluno_id = %confirmation.aluno.id,
            turma = %confirmation.turma.nome,
            valor = confirmation.pagamento.valor,
            "enrollment committed"
        );
        Ok(confirmation)
    }

    /// Re-read a committed enrollment, e.g. to regenerate a receipt.
    pub async fn confirmation(
        &self,
        matricula_id: MatriculaId,
    ) -> Result<EnrollmentConfirmation, EnrollmentError> {
        self.store
            .find_confirmation(matricula_id)
            .await?
            .ok_or(EnrollmentError::MatriculaNotFound(matricula_id))
    }

    pub async fn occupancy(&self, turma_id: TurmaId) -> Result<TurmaOccupancy, EnrollmentError> {
        let store = self.store.as_ref();
        let turma = store
            .find_turma(turma_id)
            .await?
            .ok_or(EnrollmentError::TurmaNotFound(turma_id))?;

        CapacityValidator::new(store)
            .occupancy_of(&turma)
            .await
            .map_err(EnrollmentError::at(EnrollmentStage::CapacityValidated))
    }
}
