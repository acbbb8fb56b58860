use super::CheckResult;
use crate::workflows::enrollment::domain::{
    AnoLectivoId, ClasseId, MetodoPagamentoId, Turma, TurmaId, TurmaOccupancy,
};
use crate::workflows::enrollment::rejection::{DataIntegrityFault, FieldPath, Rejection};
use crate::workflows::enrollment::repository::{
    CatalogKind, CatalogLookup, ClasseRepository, MatriculaRepository, SalaRepository,
    TurmaRepository,
};

/// Confirms the classe belongs to the enrollment year, the classe/turma
/// pairing, and that the turma still has a free seat.
pub struct CapacityValidator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> CapacityValidator<'a, S>
where
    S: CatalogLookup + ClasseRepository + TurmaRepository + SalaRepository + MatriculaRepository + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn validate(
        &self,
        ano_lectivo_id: AnoLectivoId,
        classe_id: ClasseId,
        turma_id: TurmaId,
        metodo_pagamento_id: MetodoPagamentoId,
    ) -> CheckResult<TurmaOccupancy> {
        let (classe, metodo_exists) = tokio::try_join!(
            self.store.find_classe(classe_id),
            self.store
                .exists(CatalogKind::MetodoPagamento, metodo_pagamento_id.0),
        )?;

        let Some(classe) = classe else {
            return Err(Rejection::ReferentialNotFound {
                field: FieldPath::matricula("classeId"),
                id: classe_id.0,
            }
            .into());
        };
        if classe.ano_lectivo_id != ano_lectivo_id {
            return Err(Rejection::ClasseOutsideAnoLectivo {
                classe_id,
                ano_lectivo_id,
            }
            .into());
        }
        if !metodo_exists {
            return Err(Rejection::ReferentialNotFound {
                field: FieldPath::matricula("metodoPagamentoId"),
                id: metodo_pagamento_id.0,
            }
            .into());
        }

        let turma = match self.store.find_turma(turma_id).await? {
            Some(turma) if turma.classe_id == classe_id => turma,
            Some(_) => {
                return Err(Rejection::TurmaNotInClasse {
                    turma_id,
                    classe_id,
                }
                .into())
            }
            None => {
                return Err(Rejection::ReferentialNotFound {
                    field: FieldPath::matricula("turmaId"),
                    id: turma_id.0,
                }
                .into())
            }
        };

        let occupancy = self.occupancy_of(&turma).await?;
        if occupancy.is_full() {
            return Err(Rejection::CapacityExceeded {
                turma_id,
                capacidade: occupancy.capacidade,
                ocupacao: occupancy.ocupacao,
            }
            .into());
        }

        Ok(occupancy)
    }

    /// Seat count for a turma. A turma without a sala is corrupted reference data.
    pub async fn occupancy_of(&self, turma: &Turma) -> CheckResult<TurmaOccupancy> {
        let (sala, ocupacao) = tokio::try_join!(
            self.store.find_sala(turma.sala_id),
            self.store.count_in_turma(turma.classe_id, turma.id),
        )?;

        let Some(sala) = sala else {
            return Err(DataIntegrityFault::TurmaWithoutSala {
                turma_id: turma.id,
                sala_id: turma.sala_id,
            }
            .into());
        };

        Ok(TurmaOccupancy::new(turma.id, sala.capacidade, ocupacao))
    }
}
