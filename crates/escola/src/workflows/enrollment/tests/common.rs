use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::workflows::enrollment::domain::{
    AlunoId, AlunoSubmission, AlunoSummary, AnoLectivo, AnoLectivoId, Classe, ClasseId, Contacto,
    ContactOwner, CursoId, Endereco, EnrollmentConfirmation, EnrollmentSubmission, Genero,
    MatriculaId, MetodoPagamentoId, NamedRef, NovoAluno, PagamentoId, PagamentoSummary,
    ParentescoId, ResponsavelSubmission, Sala, SalaId, Turma, TurmaId, TurnoId,
    PAGAMENTO_TIPO_MATRICULA,
};
use crate::workflows::enrollment::rejection::{ContactField, FieldPath};
use crate::workflows::enrollment::repository::{
    AlunoRepository, AnoLectivoRepository, CatalogEntry, CatalogKey, CatalogKind, CatalogLookup,
    ClasseRepository, CommitError, ContactDirectory, ContactRegistry, EnrollmentDraft,
    EnrollmentLedger, MatriculaRepository, RepositoryError, SalaRepository, TurmaRepository,
};
use crate::workflows::enrollment::{EnrollmentPolicy, EnrollmentService};

pub(crate) const CLASSE_DEZ: ClasseId = ClasseId(1);
pub(crate) const CLASSE_ONZE: ClasseId = ClasseId(2);
pub(crate) const TURMA_A: TurmaId = TurmaId(1);
pub(crate) const TURMA_B: TurmaId = TurmaId(2);
/// Belongs to classe 10 but points at a sala that was never created.
pub(crate) const TURMA_SEM_SALA: TurmaId = TurmaId(3);
/// Classe of the previous, closed academic year.
pub(crate) const CLASSE_ANTIGA: ClasseId = ClasseId(3);
pub(crate) const TURMA_ANTIGA: TurmaId = TurmaId(4);
pub(crate) const SALA_CAPACIDADE: u32 = 30;
pub(crate) const VALOR_MATRICULA: i64 = 5000;

pub(crate) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 15).expect("valid date")
}

pub(crate) fn ano_lectivo() -> AnoLectivo {
    AnoLectivo {
        id: AnoLectivoId(1),
        nome: "2025/2026".to_string(),
        inicio: NaiveDate::from_ymd_opt(2025, 9, 1).expect("valid date"),
        fim: NaiveDate::from_ymd_opt(2026, 7, 31).expect("valid date"),
        activo: true,
    }
}

fn ano_anterior() -> AnoLectivo {
    AnoLectivo {
        id: AnoLectivoId(2),
        nome: "2024/2025".to_string(),
        inicio: NaiveDate::from_ymd_opt(2024, 9, 1).expect("valid date"),
        fim: NaiveDate::from_ymd_opt(2025, 7, 31).expect("valid date"),
        activo: false,
    }
}

pub(crate) fn contacto(telefone: &str, email: Option<&str>) -> Contacto {
    Contacto {
        telefone: telefone.to_string(),
        email: email.map(str::to_string),
    }
}

fn endereco() -> Endereco {
    Endereco {
        municipio: "Luanda".to_string(),
        bairro: "Maianga".to_string(),
        numero_casa: Some("12".to_string()),
    }
}

pub(crate) fn novo_aluno() -> NovoAluno {
    NovoAluno {
        nome_completo: "Ana Domingos".to_string(),
        nome_pai: Some("Pedro Domingos".to_string()),
        nome_mae: Some("Maria Domingos".to_string()),
        numero_bi: "123456789LA123".to_string(),
        data_nascimento: NaiveDate::from_ymd_opt(2009, 5, 4).expect("valid date"),
        genero: Genero::Feminino,
        endereco: endereco(),
        contacto: contacto("911000001", Some("ana@escola.ao")),
    }
}

pub(crate) fn responsavel(telefone: &str, email: Option<&str>) -> ResponsavelSubmission {
    ResponsavelSubmission {
        nome_completo: "Pedro Domingos".to_string(),
        parentesco_id: ParentescoId(1),
        endereco: endereco(),
        contacto: contacto(telefone, email),
    }
}

pub(crate) fn submission() -> EnrollmentSubmission {
    EnrollmentSubmission {
        aluno: AlunoSubmission::Novo(novo_aluno()),
        responsaveis: vec![
            responsavel("923000001", Some("pai@escola.ao")),
            responsavel("923000002", None),
        ],
        classe_id: CLASSE_DEZ,
        turma_id: TURMA_A,
        metodo_pagamento_id: MetodoPagamentoId(1),
    }
}

pub(crate) fn build_service() -> (EnrollmentService<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(seeded_store());
    let service = EnrollmentService::new(store.clone(), EnrollmentPolicy::default());
    (service, store)
}

pub(crate) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 16 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Row counts used to assert that failed commits leave nothing behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowCounts {
    pub(crate) alunos: usize,
    pub(crate) responsaveis: usize,
    pub(crate) matriculas: usize,
    pub(crate) pagamentos: usize,
}

#[derive(Debug, Clone)]
struct StoredMatricula {
    id: MatriculaId,
    aluno_id: AlunoId,
    classe_id: ClasseId,
    turma_id: TurmaId,
    ano_lectivo_id: AnoLectivoId,
    data_matricula: NaiveDate,
}

#[derive(Debug, Clone)]
struct StoredPagamento {
    id: PagamentoId,
    matricula_id: MatriculaId,
    valor: i64,
    metodo_pagamento_id: MetodoPagamentoId,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    anos: Vec<AnoLectivo>,
    named: HashMap<CatalogKind, BTreeMap<i64, String>>,
    classes: BTreeMap<ClasseId, Classe>,
    turmas: BTreeMap<TurmaId, Turma>,
    salas: BTreeMap<SalaId, Sala>,
    alunos: BTreeMap<AlunoId, NovoAluno>,
    responsaveis: BTreeMap<i64, ResponsavelSubmission>,
    guardian_of: BTreeMap<i64, AlunoId>,
    professores: BTreeMap<i64, Contacto>,
    matriculas: Vec<StoredMatricula>,
    pagamentos: Vec<StoredPagamento>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn name_of(&self, kind: CatalogKind, id: i64) -> Result<String, RepositoryError> {
        self.named
            .get(&kind)
            .and_then(|rows| rows.get(&id))
            .cloned()
            .ok_or_else(|| RepositoryError::Corrupt(format!("{} {id}", kind.table())))
    }

    fn occupancy(&self, classe_id: ClasseId, turma_id: TurmaId) -> u32 {
        self.matriculas
            .iter()
            .filter(|m| m.classe_id == classe_id && m.turma_id == turma_id)
            .count() as u32
    }

    fn phone_owner(&self, owner: ContactOwner, telefone: &str) -> Option<i64> {
        self.contacts(owner)
            .into_iter()
            .find(|(_, contacto)| contacto.telefone() == telefone)
            .map(|(id, _)| id)
    }

    fn email_owner(&self, owner: ContactOwner, email: &str) -> Option<i64> {
        self.contacts(owner)
            .into_iter()
            .find(|(_, contacto)| {
                contacto
                    .email()
                    .is_some_and(|stored| stored.eq_ignore_ascii_case(email))
            })
            .map(|(id, _)| id)
    }

    fn contacts(&self, owner: ContactOwner) -> Vec<(i64, &Contacto)> {
        match owner {
            ContactOwner::Aluno => self
                .alunos
                .iter()
                .map(|(id, aluno)| (id.0, &aluno.contacto))
                .collect(),
            ContactOwner::Responsavel => self
                .responsaveis
                .iter()
                .map(|(id, r)| (*id, &r.contacto))
                .collect(),
            ContactOwner::Professor => self.professores.iter().map(|(id, c)| (*id, c)).collect(),
        }
    }

    fn confirmation(&self, id: MatriculaId) -> Result<Option<EnrollmentConfirmation>, RepositoryError> {
        let Some(matricula) = self.matriculas.iter().find(|m| m.id == id) else {
            return Ok(None);
        };
        let corrupt = |what: &str| RepositoryError::Corrupt(format!("{what} for matricula {id}"));

        let aluno = self.alunos.get(&matricula.aluno_id).ok_or_else(|| corrupt("aluno"))?;
        let classe = self.classes.get(&matricula.classe_id).ok_or_else(|| corrupt("classe"))?;
        let turma = self.turmas.get(&matricula.turma_id).ok_or_else(|| corrupt("turma"))?;
        let sala = self.salas.get(&turma.sala_id).ok_or_else(|| corrupt("sala"))?;
        let ano = self
            .anos
            .iter()
            .find(|ano| ano.id == matricula.ano_lectivo_id)
            .ok_or_else(|| corrupt("ano lectivo"))?;
        let pagamento = self
            .pagamentos
            .iter()
            .find(|p| p.matricula_id == id)
            .ok_or_else(|| corrupt("pagamento"))?;

        Ok(Some(EnrollmentConfirmation {
            matricula_id: id,
            data_matricula: matricula.data_matricula,
            aluno: AlunoSummary {
                id: matricula.aluno_id,
                nome_completo: aluno.nome_completo.clone(),
                numero_bi: aluno.numero_bi.clone(),
                data_nascimento: aluno.data_nascimento,
                genero: aluno.genero,
                endereco: aluno.endereco.clone(),
                contacto: aluno.contacto.clone(),
            },
            classe: NamedRef {
                id: classe.id.0,
                nome: classe.nome.clone(),
            },
            curso: NamedRef {
                id: classe.curso_id.0,
                nome: self.name_of(CatalogKind::Curso, classe.curso_id.0)?,
            },
            turma: NamedRef {
                id: turma.id.0,
                nome: turma.nome.clone(),
            },
            turno: NamedRef {
                id: turma.turno_id.0,
                nome: self.name_of(CatalogKind::Turno, turma.turno_id.0)?,
            },
            sala: NamedRef {
                id: sala.id.0,
                nome: sala.nome.clone(),
            },
            ano_lectivo: NamedRef {
                id: ano.id.0,
                nome: ano.nome.clone(),
            },
            pagamento: PagamentoSummary {
                id: pagamento.id,
                tipo: PAGAMENTO_TIPO_MATRICULA.to_string(),
                valor: pagamento.valor,
                metodo_pagamento: self
                    .name_of(CatalogKind::MetodoPagamento, pagamento.metodo_pagamento_id.0)?,
            },
        }))
    }

    /// Mirrors the SQL transaction: constraint checks first, then writes.
    fn apply(
        &mut self,
        draft: &EnrollmentDraft,
        fail_payment: bool,
    ) -> Result<EnrollmentConfirmation, CommitError> {
        let valor = self
            .classes
            .get(&draft.classe_id)
            .map(|classe| classe.valor_matricula)
            .ok_or(CommitError::ClasseMissing(draft.classe_id))?;

        let aluno_id = match &draft.aluno {
            AlunoSubmission::Novo(aluno) => {
                let aluno = NovoAluno {
                    contacto: aluno.contacto.normalized(),
                    ..aluno.clone()
                };
                if self.alunos.values().any(|a| a.numero_bi == aluno.numero_bi) {
                    return Err(CommitError::Conflict(FieldPath::aluno("numeroBi")));
                }
                if self.phone_owner(ContactOwner::Aluno, aluno.contacto.telefone()).is_some() {
                    return Err(CommitError::Conflict(FieldPath::aluno("contacto.telefone")));
                }
                if let Some(email) = aluno.contacto.email() {
                    if self.email_owner(ContactOwner::Aluno, email).is_some() {
                        return Err(CommitError::Conflict(FieldPath::aluno("contacto.email")));
                    }
                }
                let id = AlunoId(self.next_id());
                self.alunos.insert(id, aluno);
                id
            }
            AlunoSubmission::Existente { aluno_id } => *aluno_id,
        };

        for (index, responsavel) in draft.responsaveis.iter().enumerate() {
            let contacto = responsavel.contacto.normalized();
            if self
                .phone_owner(ContactOwner::Responsavel, contacto.telefone())
                .is_some()
            {
                return Err(CommitError::Conflict(FieldPath::responsavel(
                    index,
                    "contacto.telefone",
                )));
            }
            if let Some(email) = contacto.email() {
                if self.email_owner(ContactOwner::Responsavel, email).is_some() {
                    return Err(CommitError::Conflict(FieldPath::responsavel(
                        index,
                        "contacto.email",
                    )));
                }
            }
            let id = self.next_id();
            self.guardian_of.insert(id, aluno_id);
            self.responsaveis.insert(
                id,
                ResponsavelSubmission {
                    contacto,
                    ..responsavel.clone()
                },
            );
        }

        if self.matriculas.iter().any(|m| {
            m.aluno_id == aluno_id
                && m.classe_id == draft.classe_id
                && m.ano_lectivo_id == draft.ano_lectivo_id
        }) {
            return Err(CommitError::Conflict(FieldPath::matricula("matricula")));
        }

        let capacidade = self
            .turmas
            .get(&draft.turma_id)
            .and_then(|turma| self.salas.get(&turma.sala_id))
            .map(|sala| sala.capacidade)
            .ok_or_else(|| RepositoryError::Corrupt(format!("turma {} has no sala", draft.turma_id)))?;
        let ocupacao = self.occupancy(draft.classe_id, draft.turma_id);
        if ocupacao >= capacidade {
            return Err(CommitError::CapacityExceeded {
                turma_id: draft.turma_id,
                capacidade,
                ocupacao,
            });
        }

        let matricula_id = MatriculaId(self.next_id());
        self.matriculas.push(StoredMatricula {
            id: matricula_id,
            aluno_id,
            classe_id: draft.classe_id,
            turma_id: draft.turma_id,
            ano_lectivo_id: draft.ano_lectivo_id,
            data_matricula: draft.data_matricula,
        });

        if fail_payment {
            return Err(RepositoryError::Unavailable("pagamentos insert failed".to_string()).into());
        }
        let pagamento_id = PagamentoId(self.next_id());
        self.pagamentos.push(StoredPagamento {
            id: pagamento_id,
            matricula_id,
            valor,
            metodo_pagamento_id: draft.metodo_pagamento_id,
        });

        self.confirmation(matricula_id)?.ok_or_else(|| {
            RepositoryError::Corrupt(format!("matricula {matricula_id} missing after insert")).into()
        })
    }
}

/// In-memory double for every repository trait. Commits run against a copy of
/// the state that only replaces the original on success.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
    reads: AtomicUsize,
    fail_payment: AtomicBool,
    hide_occupancy: AtomicBool,
}

pub(crate) fn seeded_store() -> MemoryStore {
    let mut state = MemoryState {
        next_id: 1000,
        anos: vec![ano_lectivo(), ano_anterior()],
        ..MemoryState::default()
    };

    for (kind, rows) in [
        (CatalogKind::Curso, vec![(1, "Informatica")]),
        (CatalogKind::Turno, vec![(1, "Manha"), (2, "Tarde")]),
        (CatalogKind::MetodoPagamento, vec![(1, "Multicaixa"), (2, "Numerario")]),
        (CatalogKind::Parentesco, vec![(1, "Pai"), (2, "Mae")]),
        (CatalogKind::Disciplina, vec![(1, "Matematica")]),
    ] {
        state.named.insert(
            kind,
            rows.into_iter()
                .map(|(id, nome)| (id, nome.to_string()))
                .collect(),
        );
    }

    state.salas.insert(
        SalaId(1),
        Sala {
            id: SalaId(1),
            nome: "Sala 1".to_string(),
            capacidade: SALA_CAPACIDADE,
        },
    );
    for (id, nome, valor, ano) in [
        (CLASSE_DEZ, "10a Classe", VALOR_MATRICULA, AnoLectivoId(1)),
        (CLASSE_ONZE, "11a Classe", 6000, AnoLectivoId(1)),
        (CLASSE_ANTIGA, "10a Classe", 4500, AnoLectivoId(2)),
    ] {
        state.classes.insert(
            id,
            Classe {
                id,
                nome: nome.to_string(),
                curso_id: CursoId(1),
                ano_lectivo_id: ano,
                valor_matricula: valor,
            },
        );
    }
    for (id, nome, classe_id, sala_id) in [
        (TURMA_A, "A", CLASSE_DEZ, SalaId(1)),
        (TURMA_B, "B", CLASSE_ONZE, SalaId(1)),
        (TURMA_SEM_SALA, "C", CLASSE_DEZ, SalaId(99)),
        (TURMA_ANTIGA, "A", CLASSE_ANTIGA, SalaId(1)),
    ] {
        state.turmas.insert(
            id,
            Turma {
                id,
                nome: nome.to_string(),
                classe_id,
                sala_id,
                turno_id: TurnoId(1),
            },
        );
    }

    MemoryStore {
        state: Mutex::new(state),
        ..MemoryStore::default()
    }
}

impl MemoryStore {
    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("store mutex poisoned")
    }

    fn read(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.state()
    }

    /// Number of repository reads served so far.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make the pagamento write of the next commits fail after the matricula row.
    pub(crate) fn fail_payments(&self) {
        self.fail_payment.store(true, Ordering::SeqCst);
    }

    /// Report empty turmas to validators, as if another request filled the
    /// last seat between validation and commit.
    pub(crate) fn hide_occupancy(&self) {
        self.hide_occupancy.store(true, Ordering::SeqCst);
    }

    pub(crate) fn counts(&self) -> RowCounts {
        let state = self.state();
        RowCounts {
            alunos: state.alunos.len(),
            responsaveis: state.responsaveis.len(),
            matriculas: state.matriculas.len(),
            pagamentos: state.pagamentos.len(),
        }
    }

    pub(crate) fn insert_aluno_with_contact(&self, telefone: &str, email: Option<&str>) -> AlunoId {
        let mut state = self.state();
        let id = AlunoId(state.next_id());
        let aluno = NovoAluno {
            numero_bi: format!("{:09}LA001", id.0),
            contacto: contacto(telefone, email),
            ..novo_aluno()
        };
        state.alunos.insert(id, aluno);
        id
    }

    pub(crate) fn aluno_contact(&self, id: AlunoId) -> Option<Contacto> {
        self.state().alunos.get(&id).map(|aluno| aluno.contacto.clone())
    }

    pub(crate) fn insert_professor(&self, telefone: &str, email: Option<&str>) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.professores.insert(id, contacto(telefone, email));
        id
    }

    pub(crate) fn insert_responsavel(&self, telefone: &str, email: Option<&str>) {
        let mut state = self.state();
        let id = state.next_id();
        state.responsaveis.insert(id, responsavel(telefone, email));
    }

    /// Store `count` guardians for an already registered student.
    pub(crate) fn attach_guardians(&self, aluno_id: AlunoId, count: u32) {
        let mut state = self.state();
        for n in 0..count {
            let id = state.next_id();
            state.guardian_of.insert(id, aluno_id);
            state
                .responsaveis
                .insert(id, responsavel(&format!("96{:07}", n), None));
        }
    }

    /// Enroll `count` generated students into `turma_id` for the active year.
    pub(crate) fn fill_turma(&self, classe_id: ClasseId, turma_id: TurmaId, count: u32) {
        for n in 0..count {
            let aluno_id = self.insert_aluno_with_contact(&format!("95{:07}", n), None);
            let mut state = self.state();
            let id = MatriculaId(state.next_id());
            state.matriculas.push(StoredMatricula {
                id,
                aluno_id,
                classe_id,
                turma_id,
                ano_lectivo_id: AnoLectivoId(1),
                data_matricula: today(),
            });
        }
    }

    pub(crate) fn enroll_existing(&self, aluno_id: AlunoId, classe_id: ClasseId, turma_id: TurmaId) {
        let mut state = self.state();
        let id = MatriculaId(state.next_id());
        state.matriculas.push(StoredMatricula {
            id,
            aluno_id,
            classe_id,
            turma_id,
            ano_lectivo_id: AnoLectivoId(1),
            data_matricula: today(),
        });
    }

    pub(crate) fn close_ano_lectivo(&self) {
        for ano in self.state().anos.iter_mut() {
            ano.activo = false;
        }
    }
}

#[async_trait]
impl CatalogLookup for MemoryStore {
    async fn exists(&self, kind: CatalogKind, id: i64) -> Result<bool, RepositoryError> {
        let state = self.read();
        Ok(match kind {
            CatalogKind::Classe => state.classes.contains_key(&ClasseId(id)),
            CatalogKind::Turma => state.turmas.contains_key(&TurmaId(id)),
            CatalogKind::Sala => state.salas.contains_key(&SalaId(id)),
            CatalogKind::AnoLectivo => state.anos.iter().any(|ano| ano.id.0 == id),
            other => state
                .named
                .get(&other)
                .is_some_and(|rows| rows.contains_key(&id)),
        })
    }

    async fn find_by_unique_key(
        &self,
        key: &CatalogKey,
    ) -> Result<Option<CatalogEntry>, RepositoryError> {
        let state = self.read();
        let found = match key {
            CatalogKey::Classe {
                nome,
                curso_id,
                ano_lectivo_id,
            } => state
                .classes
                .values()
                .find(|c| &c.nome == nome && c.curso_id == *curso_id && c.ano_lectivo_id == *ano_lectivo_id)
                .map(|c| (c.id.0, c.nome.clone())),
            CatalogKey::Turma {
                nome,
                classe_id,
                sala_id,
                turno_id,
            } => state
                .turmas
                .values()
                .find(|t| {
                    &t.nome == nome
                        && t.classe_id == *classe_id
                        && t.sala_id == *sala_id
                        && t.turno_id == *turno_id
                })
                .map(|t| (t.id.0, t.nome.clone())),
            CatalogKey::Named { catalog, nome } => state
                .named
                .get(&catalog.kind())
                .and_then(|rows| rows.iter().find(|(_, n)| *n == nome))
                .map(|(id, n)| (*id, n.clone())),
        };
        Ok(found.map(|(id, nome)| CatalogEntry {
            kind: key.kind(),
            id,
            nome,
        }))
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn is_phone_taken(
        &self,
        owner: ContactOwner,
        telefone: &str,
        exclude: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        let state = self.read();
        Ok(state
            .contacts(owner)
            .into_iter()
            .any(|(id, c)| Some(id) != exclude && c.telefone() == telefone))
    }

    async fn is_email_taken(
        &self,
        owner: ContactOwner,
        email: &str,
        exclude: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        let state = self.read();
        Ok(state.contacts(owner).into_iter().any(|(id, c)| {
            Some(id) != exclude && c.email().is_some_and(|e| e.eq_ignore_ascii_case(email))
        }))
    }
}

#[async_trait]
impl ContactRegistry for MemoryStore {
    async fn owner_exists(&self, owner: ContactOwner, id: i64) -> Result<bool, RepositoryError> {
        let state = self.read();
        Ok(state.contacts(owner).into_iter().any(|(row, _)| row == id))
    }

    async fn update_contact(
        &self,
        owner: ContactOwner,
        id: i64,
        contacto: &Contacto,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state();
        let contacto = contacto.normalized();
        if state
            .phone_owner(owner, contacto.telefone())
            .is_some_and(|holder| holder != id)
        {
            return Err(RepositoryError::ContactTaken(ContactField::Telefone));
        }
        if let Some(email) = contacto.email() {
            if state.email_owner(owner, email).is_some_and(|holder| holder != id) {
                return Err(RepositoryError::ContactTaken(ContactField::Email));
            }
        }
        let slot = match owner {
            ContactOwner::Aluno => state.alunos.get_mut(&AlunoId(id)).map(|a| &mut a.contacto),
            ContactOwner::Responsavel => state.responsaveis.get_mut(&id).map(|r| &mut r.contacto),
            ContactOwner::Professor => state.professores.get_mut(&id),
        };
        let slot = slot.ok_or(RepositoryError::NotFound)?;
        *slot = contacto;
        Ok(())
    }
}

#[async_trait]
impl AlunoRepository for MemoryStore {
    async fn aluno_exists(&self, id: AlunoId) -> Result<bool, RepositoryError> {
        Ok(self.read().alunos.contains_key(&id))
    }

    async fn is_document_taken(&self, numero_bi: &str) -> Result<bool, RepositoryError> {
        Ok(self.read().alunos.values().any(|a| a.numero_bi == numero_bi))
    }

    async fn count_guardians(&self, id: AlunoId) -> Result<u32, RepositoryError> {
        Ok(self.read().guardian_of.values().filter(|aluno| **aluno == id).count() as u32)
    }
}

#[async_trait]
impl ClasseRepository for MemoryStore {
    async fn find_classe(&self, id: ClasseId) -> Result<Option<Classe>, RepositoryError> {
        Ok(self.read().classes.get(&id).cloned())
    }
}

#[async_trait]
impl TurmaRepository for MemoryStore {
    async fn find_turma(&self, id: TurmaId) -> Result<Option<Turma>, RepositoryError> {
        Ok(self.read().turmas.get(&id).cloned())
    }
}

#[async_trait]
impl SalaRepository for MemoryStore {
    async fn find_sala(&self, id: SalaId) -> Result<Option<Sala>, RepositoryError> {
        Ok(self.read().salas.get(&id).cloned())
    }
}

#[async_trait]
impl MatriculaRepository for MemoryStore {
    async fn count_in_turma(
        &self,
        classe_id: ClasseId,
        turma_id: TurmaId,
    ) -> Result<u32, RepositoryError> {
        let state = self.read();
        if self.hide_occupancy.load(Ordering::SeqCst) {
            return Ok(0);
        }
        Ok(state.occupancy(classe_id, turma_id))
    }

    async fn exists_for(
        &self,
        aluno_id: AlunoId,
        classe_id: ClasseId,
        ano_lectivo_id: AnoLectivoId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.read().matriculas.iter().any(|m| {
            m.aluno_id == aluno_id && m.classe_id == classe_id && m.ano_lectivo_id == ano_lectivo_id
        }))
    }

    async fn find_confirmation(
        &self,
        id: MatriculaId,
    ) -> Result<Option<EnrollmentConfirmation>, RepositoryError> {
        self.read().confirmation(id)
    }
}

#[async_trait]
impl AnoLectivoRepository for MemoryStore {
    async fn active(&self) -> Result<Option<AnoLectivo>, RepositoryError> {
        Ok(self.read().anos.iter().find(|ano| ano.activo).cloned())
    }
}

#[async_trait]
impl EnrollmentLedger for MemoryStore {
    async fn commit(&self, draft: EnrollmentDraft) -> Result<EnrollmentConfirmation, CommitError> {
        let mut state = self.state();
        let mut working = state.clone();
        let confirmation = working.apply(&draft, self.fail_payment.load(Ordering::SeqCst))?;
        *state = working;
        Ok(confirmation)
    }
}

/// Store whose every call fails, for error mapping tests.
pub(crate) struct UnavailableStore;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

#[async_trait]
impl CatalogLookup for UnavailableStore {
    async fn exists(&self, _kind: CatalogKind, _id: i64) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn find_by_unique_key(
        &self,
        _key: &CatalogKey,
    ) -> Result<Option<CatalogEntry>, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl ContactDirectory for UnavailableStore {
    async fn is_phone_taken(
        &self,
        _owner: ContactOwner,
        _telefone: &str,
        _exclude: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn is_email_taken(
        &self,
        _owner: ContactOwner,
        _email: &str,
        _exclude: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl ContactRegistry for UnavailableStore {
    async fn owner_exists(&self, _owner: ContactOwner, _id: i64) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn update_contact(
        &self,
        _owner: ContactOwner,
        _id: i64,
        _contacto: &Contacto,
    ) -> Result<(), RepositoryError> {
        offline()
    }
}

#[async_trait]
impl AlunoRepository for UnavailableStore {
    async fn aluno_exists(&self, _id: AlunoId) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn is_document_taken(&self, _numero_bi: &str) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn count_guardians(&self, _id: AlunoId) -> Result<u32, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl ClasseRepository for UnavailableStore {
    async fn find_classe(&self, _id: ClasseId) -> Result<Option<Classe>, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl TurmaRepository for UnavailableStore {
    async fn find_turma(&self, _id: TurmaId) -> Result<Option<Turma>, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl SalaRepository for UnavailableStore {
    async fn find_sala(&self, _id: SalaId) -> Result<Option<Sala>, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl MatriculaRepository for UnavailableStore {
    async fn count_in_turma(
        &self,
        _classe_id: ClasseId,
        _turma_id: TurmaId,
    ) -> Result<u32, RepositoryError> {
        offline()
    }

    async fn exists_for(
        &self,
        _aluno_id: AlunoId,
        _classe_id: ClasseId,
        _ano_lectivo_id: AnoLectivoId,
    ) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn find_confirmation(
        &self,
        _id: MatriculaId,
    ) -> Result<Option<EnrollmentConfirmation>, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl AnoLectivoRepository for UnavailableStore {
    async fn active(&self) -> Result<Option<AnoLectivo>, RepositoryError> {
        offline()
    }
}

#[async_trait]
impl EnrollmentLedger for UnavailableStore {
    async fn commit(&self, _draft: EnrollmentDraft) -> Result<EnrollmentConfirmation, CommitError> {
        Err(CommitError::Repository(RepositoryError::Unavailable(
            "database offline".to_string(),
        )))
    }
}
