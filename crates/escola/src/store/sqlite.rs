//! SQLite adapter implementing every repository trait of the enrollment workflow.
//!
//! The capacity check and the matricula insert run as one conditional
//! `INSERT ... SELECT` inside the commit transaction, so two requests racing
//! for the last seat cannot both succeed.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, error, warn};

use crate::workflows::enrollment::domain::{
    AlunoId, AlunoSubmission, AlunoSummary, AnoLectivo, AnoLectivoId, Classe, ClasseId, Contacto,
    ContactOwner, CursoId, Endereco, EnrollmentConfirmation, Genero, MatriculaId, NamedRef,
    NovoAluno, PagamentoId, PagamentoSummary, ResponsavelSubmission, Sala, SalaId, Turma, TurmaId,
    TurnoId, PAGAMENTO_TIPO_MATRICULA,
};
use crate::workflows::enrollment::rejection::{ContactField, FieldPath};
use crate::workflows::enrollment::repository::{
    AlunoRepository, AnoLectivoRepository, CatalogEntry, CatalogKey, CatalogKind, CatalogLookup,
    ClasseRepository, CommitError, ContactDirectory, ContactRegistry, EnrollmentDraft,
    EnrollmentLedger, MatriculaRepository, RepositoryError, SalaRepository, TurmaRepository,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS anos_lectivos (
        id      INTEGER PRIMARY KEY,
        nome    TEXT    NOT NULL UNIQUE,
        inicio  TEXT    NOT NULL,
        fim     TEXT    NOT NULL,
        activo  INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS cursos (
        id   INTEGER PRIMARY KEY,
        nome TEXT    NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS disciplinas (
        id   INTEGER PRIMARY KEY,
        nome TEXT    NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS turnos (
        id   INTEGER PRIMARY KEY,
        nome TEXT    NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS salas (
        id         INTEGER PRIMARY KEY,
        nome       TEXT    NOT NULL UNIQUE,
        capacidade INTEGER NOT NULL CHECK (capacidade BETWEEN 10 AND 70)
    )",
    "CREATE TABLE IF NOT EXISTS metodos_pagamento (
        id   INTEGER PRIMARY KEY,
        nome TEXT    NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS parentescos (
        id   INTEGER PRIMARY KEY,
        nome TEXT    NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS classes (
        id              INTEGER PRIMARY KEY,
        nome            TEXT    NOT NULL,
        curso_id        INTEGER NOT NULL REFERENCES cursos (id),
        ano_lectivo_id  INTEGER NOT NULL REFERENCES anos_lectivos (id),
        valor_matricula INTEGER NOT NULL,
        UNIQUE (nome, curso_id, ano_lectivo_id)
    )",
    "CREATE TABLE IF NOT EXISTS turmas (
        id        INTEGER PRIMARY KEY,
        nome      TEXT    NOT NULL,
        classe_id INTEGER NOT NULL REFERENCES classes (id),
        sala_id   INTEGER NOT NULL REFERENCES salas (id),
        turno_id  INTEGER NOT NULL REFERENCES turnos (id),
        UNIQUE (nome, classe_id, sala_id, turno_id)
    )",
    "CREATE TABLE IF NOT EXISTS alunos (
        id              INTEGER PRIMARY KEY,
        nome_completo   TEXT    NOT NULL,
        nome_pai        TEXT,
        nome_mae        TEXT,
        numero_bi       TEXT    NOT NULL UNIQUE,
        data_nascimento TEXT    NOT NULL,
        genero          TEXT    NOT NULL,
        municipio       TEXT    NOT NULL,
        bairro          TEXT    NOT NULL,
        numero_casa     TEXT,
        telefone        TEXT    NOT NULL UNIQUE,
        email           TEXT    UNIQUE COLLATE NOCASE
    )",
    "CREATE TABLE IF NOT EXISTS responsaveis (
        id            INTEGER PRIMARY KEY,
        aluno_id      INTEGER NOT NULL REFERENCES alunos (id),
        parentesco_id INTEGER NOT NULL REFERENCES parentescos (id),
        nome_completo TEXT    NOT NULL,
        municipio     TEXT    NOT NULL,
        bairro        TEXT    NOT NULL,
        numero_casa   TEXT,
        telefone      TEXT    NOT NULL UNIQUE,
        email         TEXT    UNIQUE COLLATE NOCASE
    )",
    "CREATE TABLE IF NOT EXISTS professores (
        id            INTEGER PRIMARY KEY,
        nome_completo TEXT    NOT NULL,
        telefone      TEXT    NOT NULL UNIQUE,
        email         TEXT    UNIQUE COLLATE NOCASE
    )",
    "CREATE TABLE IF NOT EXISTS matriculas (
        id             INTEGER PRIMARY KEY,
        aluno_id       INTEGER NOT NULL REFERENCES alunos (id),
        classe_id      INTEGER NOT NULL REFERENCES classes (id),
        turma_id       INTEGER NOT NULL REFERENCES turmas (id),
        ano_lectivo_id INTEGER NOT NULL REFERENCES anos_lectivos (id),
        data_matricula TEXT    NOT NULL,
        UNIQUE (aluno_id, classe_id, ano_lectivo_id)
    )",
    "CREATE INDEX IF NOT EXISTS matriculas_turma_idx ON matriculas (classe_id, turma_id)",
    "CREATE INDEX IF NOT EXISTS responsaveis_aluno_idx ON responsaveis (aluno_id)",
    "CREATE TABLE IF NOT EXISTS pagamentos (
        id                  INTEGER PRIMARY KEY,
        matricula_id        INTEGER NOT NULL UNIQUE REFERENCES matriculas (id),
        tipo                TEXT    NOT NULL,
        valor               INTEGER NOT NULL,
        metodo_pagamento_id INTEGER NOT NULL REFERENCES metodos_pagamento (id),
        data_pagamento      TEXT    NOT NULL
    )",
];

const CONFIRMATION_QUERY: &str = "
    SELECT m.id AS matricula_id, m.data_matricula,
           a.id AS aluno_id, a.nome_completo, a.numero_bi, a.data_nascimento, a.genero,
           a.municipio, a.bairro, a.numero_casa, a.telefone, a.email,
           c.id AS classe_id, c.nome AS classe_nome,
           cu.id AS curso_id, cu.nome AS curso_nome,
           t.id AS turma_id, t.nome AS turma_nome,
           tu.id AS turno_id, tu.nome AS turno_nome,
           s.id AS sala_id, s.nome AS sala_nome,
           al.id AS ano_lectivo_id, al.nome AS ano_lectivo_nome,
           p.id AS pagamento_id, p.tipo, p.valor, mp.nome AS metodo_nome
    FROM matriculas m
    JOIN alunos a             ON a.id = m.aluno_id
    JOIN classes c            ON c.id = m.classe_id
    JOIN cursos cu            ON cu.id = c.curso_id
    JOIN turmas t             ON t.id = m.turma_id
    JOIN turnos tu            ON tu.id = t.turno_id
    JOIN salas s              ON s.id = t.sala_id
    JOIN anos_lectivos al     ON al.id = m.ano_lectivo_id
    JOIN pagamentos p         ON p.matricula_id = m.id
    JOIN metodos_pagamento mp ON mp.id = p.metodo_pagamento_id
    WHERE m.id = ?";

/// How long a connection waits on another writer's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Repository adapter backed by a SQLite database via `sqlx`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`. Foreign keys are enforced.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection is kept open for the
    /// pool's lifetime because every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create every table and index. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = SCHEMA.len(), "sqlite schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn unavailable(context: &'static str) -> impl Fn(sqlx::Error) -> RepositoryError {
    move |err| {
        error!(context, %err, "sqlite query failed");
        RepositoryError::Unavailable(format!("{context}: {err}"))
    }
}

fn corrupt(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Corrupt(err.to_string())
}

fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Some(db.message().to_string()),
        _ => None,
    }
}

/// Map a failed insert to a field conflict when `conflict_field` recognises the constraint.
fn commit_error<F>(context: &'static str, conflict_field: F) -> impl FnOnce(sqlx::Error) -> CommitError
where
    F: FnOnce(&str) -> Option<FieldPath>,
{
    move |err| {
        if let Some(field) = unique_violation(&err).as_deref().and_then(conflict_field) {
            warn!(context, %field, "unique constraint rejected enrollment commit");
            return CommitError::Conflict(field);
        }
        CommitError::Repository(unavailable(context)(err))
    }
}

fn aluno_conflict(message: &str) -> Option<FieldPath> {
    if message.contains("alunos.numero_bi") {
        Some(FieldPath::aluno("numeroBi"))
    } else if message.contains("alunos.telefone") {
        Some(FieldPath::aluno("contacto.telefone"))
    } else if message.contains("alunos.email") {
        Some(FieldPath::aluno("contacto.email"))
    } else {
        None
    }
}

fn responsavel_conflict(index: usize) -> impl FnOnce(&str) -> Option<FieldPath> {
    move |message| {
        if message.contains("responsaveis.telefone") {
            Some(FieldPath::responsavel(index, "contacto.telefone"))
        } else if message.contains("responsaveis.email") {
            Some(FieldPath::responsavel(index, "contacto.email"))
        } else {
            None
        }
    }
}

fn matricula_conflict(message: &str) -> Option<FieldPath> {
    message
        .contains("matriculas.")
        .then_some(FieldPath::matricula("matricula"))
}

fn contact_conflict(message: &str) -> Option<ContactField> {
    if message.ends_with(".telefone") {
        Some(ContactField::Telefone)
    } else if message.ends_with(".email") {
        Some(ContactField::Email)
    } else {
        None
    }
}

fn capacity_from(value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("capacidade {value}")))
}

async fn load_confirmation(
    conn: &mut SqliteConnection,
    id: MatriculaId,
) -> Result<Option<EnrollmentConfirmation>, RepositoryError> {
    let row = sqlx::query(CONFIRMATION_QUERY)
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unavailable("matricula.confirmation"))?;

    row.as_ref().map(confirmation_from_row).transpose()
}

fn named(row: &SqliteRow, id: &str, nome: &str) -> Result<NamedRef, RepositoryError> {
    Ok(NamedRef {
        id: row.try_get(id).map_err(corrupt)?,
        nome: row.try_get(nome).map_err(corrupt)?,
    })
}

fn confirmation_from_row(row: &SqliteRow) -> Result<EnrollmentConfirmation, RepositoryError> {
    let genero: String = row.try_get("genero").map_err(corrupt)?;
    let genero = Genero::from_code(&genero)
        .ok_or_else(|| RepositoryError::Corrupt(format!("genero '{genero}'")))?;

    Ok(EnrollmentConfirmation {
        matricula_id: MatriculaId(row.try_get("matricula_id").map_err(corrupt)?),
        data_matricula: row.try_get("data_matricula").map_err(corrupt)?,
        aluno: AlunoSummary {
            id: AlunoId(row.try_get("aluno_id").map_err(corrupt)?),
            nome_completo: row.try_get("nome_completo").map_err(corrupt)?,
            numero_bi: row.try_get("numero_bi").map_err(corrupt)?,
            data_nascimento: row.try_get("data_nascimento").map_err(corrupt)?,
            genero,
            endereco: Endereco {
                municipio: row.try_get("municipio").map_err(corrupt)?,
                bairro: row.try_get("bairro").map_err(corrupt)?,
                numero_casa: row.try_get("numero_casa").map_err(corrupt)?,
            },
            contacto: Contacto {
                telefone: row.try_get("telefone").map_err(corrupt)?,
                email: row.try_get("email").map_err(corrupt)?,
            },
        },
        classe: named(row, "classe_id", "classe_nome")?,
        curso: named(row, "curso_id", "curso_nome")?,
        turma: named(row, "turma_id", "turma_nome")?,
        turno: named(row, "turno_id", "turno_nome")?,
        sala: named(row, "sala_id", "sala_nome")?,
        ano_lectivo: named(row, "ano_lectivo_id", "ano_lectivo_nome")?,
        pagamento: PagamentoSummary {
            id: PagamentoId(row.try_get("pagamento_id").map_err(corrupt)?),
            tipo: row.try_get("tipo").map_err(corrupt)?,
            valor: row.try_get("valor").map_err(corrupt)?,
            metodo_pagamento: row.try_get("metodo_nome").map_err(corrupt)?,
        },
    })
}

async fn insert_aluno(conn: &mut SqliteConnection, aluno: &NovoAluno) -> Result<AlunoId, CommitError> {
    let contacto = aluno.contacto.normalized();
    let result = sqlx::query(
        "INSERT INTO alunos
         (nome_completo, nome_pai, nome_mae, numero_bi, data_nascimento, genero,
          municipio, bairro, numero_casa, telefone, email)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(aluno.nome_completo.trim())
    .bind(aluno.nome_pai.as_deref())
    .bind(aluno.nome_mae.as_deref())
    .bind(aluno.numero_bi.trim())
    .bind(aluno.data_nascimento)
    .bind(aluno.genero.code())
    .bind(&aluno.endereco.municipio)
    .bind(&aluno.endereco.bairro)
    .bind(aluno.endereco.numero_casa.as_deref())
    .bind(&contacto.telefone)
    .bind(contacto.email.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(commit_error("aluno.insert", aluno_conflict))?;

    Ok(AlunoId(result.last_insert_rowid()))
}

async fn insert_responsavel(
    conn: &mut SqliteConnection,
    aluno_id: AlunoId,
    index: usize,
    responsavel: &ResponsavelSubmission,
) -> Result<(), CommitError> {
    let contacto = responsavel.contacto.normalized();
    sqlx::query(
        "INSERT INTO responsaveis
         (aluno_id, parentesco_id, nome_completo, municipio, bairro, numero_casa, telefone, email)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(aluno_id.0)
    .bind(responsavel.parentesco_id.0)
    .bind(responsavel.nome_completo.trim())
    .bind(&responsavel.endereco.municipio)
    .bind(&responsavel.endereco.bairro)
    .bind(responsavel.endereco.numero_casa.as_deref())
    .bind(&contacto.telefone)
    .bind(contacto.email.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(commit_error("responsavel.insert", responsavel_conflict(index)))?;

    Ok(())
}

#[async_trait]
impl CatalogLookup for SqliteStore {
    async fn exists(&self, kind: CatalogKind, id: i64) -> Result<bool, RepositoryError> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", kind.table());
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable("catalog.exists"))
    }

    async fn find_by_unique_key(
        &self,
        key: &CatalogKey,
    ) -> Result<Option<CatalogEntry>, RepositoryError> {
        let row = match key {
            CatalogKey::Classe {
                nome,
                curso_id,
                ano_lectivo_id,
            } => {
                sqlx::query(
                    "SELECT id, nome FROM classes
                     WHERE nome = ? AND curso_id = ? AND ano_lectivo_id = ?",
                )
                .bind(nome)
                .bind(curso_id.0)
                .bind(ano_lectivo_id.0)
                .fetch_optional(&self.pool)
                .await
            }
            CatalogKey::Turma {
                nome,
                classe_id,
                sala_id,
                turno_id,
            } => {
                sqlx::query(
                    "SELECT id, nome FROM turmas
                     WHERE nome = ? AND classe_id = ? AND sala_id = ? AND turno_id = ?",
                )
                .bind(nome)
                .bind(classe_id.0)
                .bind(sala_id.0)
                .bind(turno_id.0)
                .fetch_optional(&self.pool)
                .await
            }
            CatalogKey::Named { catalog, nome } => {
                let sql = format!(
                    "SELECT id, nome FROM {} WHERE nome = ?",
                    catalog.kind().table()
                );
                sqlx::query(&sql)
                    .bind(nome)
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .map_err(unavailable("catalog.find_by_unique_key"))?;

        row.map(|row| {
            Ok(CatalogEntry {
                kind: key.kind(),
                id: row.try_get("id").map_err(corrupt)?,
                nome: row.try_get("nome").map_err(corrupt)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ContactDirectory for SqliteStore {
    async fn is_phone_taken(
        &self,
        owner: ContactOwner,
        telefone: &str,
        exclude: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE telefone = ? AND (? IS NULL OR id <> ?))",
            owner.table()
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(telefone)
            .bind(exclude)
            .bind(exclude)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable("contact.phone"))
    }

    async fn is_email_taken(
        &self,
        owner: ContactOwner,
        email: &str,
        exclude: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE email = ? AND (? IS NULL OR id <> ?))",
            owner.table()
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(email)
            .bind(exclude)
            .bind(exclude)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable("contact.email"))
    }
}

#[async_trait]
impl ContactRegistry for SqliteStore {
    async fn owner_exists(&self, owner: ContactOwner, id: i64) -> Result<bool, RepositoryError> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", owner.table());
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable("contact.owner_exists"))
    }

    async fn update_contact(
        &self,
        owner: ContactOwner,
        id: i64,
        contacto: &Contacto,
    ) -> Result<(), RepositoryError> {
        let sql = format!(
            "UPDATE {} SET telefone = ?, email = ? WHERE id = ?",
            owner.table()
        );
        let result = sqlx::query(&sql)
            .bind(contacto.telefone())
            .bind(contacto.email())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                match unique_violation(&err).as_deref().and_then(contact_conflict) {
                    Some(field) => {
                        warn!(
                            owner = owner.label(),
                            id,
                            field = field.label(),
                            "unique constraint rejected contact update"
                        );
                        RepositoryError::ContactTaken(field)
                    }
                    None => unavailable("contact.update")(err),
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl AlunoRepository for SqliteStore {
    async fn aluno_exists(&self, id: AlunoId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM alunos WHERE id = ?)")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable("aluno.exists"))
    }

    async fn is_document_taken(&self, numero_bi: &str) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM alunos WHERE numero_bi = ?)")
            .bind(numero_bi)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable("aluno.numero_bi"))
    }

    async fn count_guardians(&self, id: AlunoId) -> Result<u32, RepositoryError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM responsaveis WHERE aluno_id = ?")
                .bind(id.0)
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable("aluno.count_guardians"))?;

        capacity_from(count)
    }
}

#[async_trait]
impl ClasseRepository for SqliteStore {
    async fn find_classe(&self, id: ClasseId) -> Result<Option<Classe>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, nome, curso_id, ano_lectivo_id, valor_matricula FROM classes WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable("classe.find"))?;

        row.map(|row| {
            Ok(Classe {
                id: ClasseId(row.try_get("id").map_err(corrupt)?),
                nome: row.try_get("nome").map_err(corrupt)?,
                curso_id: CursoId(row.try_get("curso_id").map_err(corrupt)?),
                ano_lectivo_id: AnoLectivoId(row.try_get("ano_lectivo_id").map_err(corrupt)?),
                valor_matricula: row.try_get("valor_matricula").map_err(corrupt)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl TurmaRepository for SqliteStore {
    async fn find_turma(&self, id: TurmaId) -> Result<Option<Turma>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, nome, classe_id, sala_id, turno_id FROM turmas WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable("turma.find"))?;

        row.map(|row| {
            Ok(Turma {
                id: TurmaId(row.try_get("id").map_err(corrupt)?),
                nome: row.try_get("nome").map_err(corrupt)?,
                classe_id: ClasseId(row.try_get("classe_id").map_err(corrupt)?),
                sala_id: SalaId(row.try_get("sala_id").map_err(corrupt)?),
                turno_id: TurnoId(row.try_get("turno_id").map_err(corrupt)?),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl SalaRepository for SqliteStore {
    async fn find_sala(&self, id: SalaId) -> Result<Option<Sala>, RepositoryError> {
        let row = sqlx::query("SELECT id, nome, capacidade FROM salas WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable("sala.find"))?;

        row.map(|row| {
            Ok(Sala {
                id: SalaId(row.try_get("id").map_err(corrupt)?),
                nome: row.try_get("nome").map_err(corrupt)?,
                capacidade: capacity_from(row.try_get("capacidade").map_err(corrupt)?)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl MatriculaRepository for SqliteStore {
    async fn count_in_turma(
        &self,
        classe_id: ClasseId,
        turma_id: TurmaId,
    ) -> Result<u32, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM matriculas WHERE classe_id = ? AND turma_id = ?",
        )
        .bind(classe_id.0)
        .bind(turma_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable("matricula.count"))?;

        capacity_from(count)
    }

    async fn exists_for(
        &self,
        aluno_id: AlunoId,
        classe_id: ClasseId,
        ano_lectivo_id: AnoLectivoId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM matriculas
             WHERE aluno_id = ? AND classe_id = ? AND ano_lectivo_id = ?)",
        )
        .bind(aluno_id.0)
        .bind(classe_id.0)
        .bind(ano_lectivo_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable("matricula.exists_for"))
    }

    async fn find_confirmation(
        &self,
        id: MatriculaId,
    ) -> Result<Option<EnrollmentConfirmation>, RepositoryError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(unavailable("matricula.acquire"))?;
        load_confirmation(&mut conn, id).await
    }
}

#[async_trait]
impl AnoLectivoRepository for SqliteStore {
    async fn active(&self) -> Result<Option<AnoLectivo>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, nome, inicio, fim, activo FROM anos_lectivos
             WHERE activo = 1 ORDER BY inicio DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable("ano_lectivo.active"))?;

        row.map(|row| {
            Ok(AnoLectivo {
                id: AnoLectivoId(row.try_get("id").map_err(corrupt)?),
                nome: row.try_get("nome").map_err(corrupt)?,
                inicio: row.try_get("inicio").map_err(corrupt)?,
                fim: row.try_get("fim").map_err(corrupt)?,
                activo: row.try_get("activo").map_err(corrupt)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl EnrollmentLedger for SqliteStore {
    async fn commit(&self, draft: EnrollmentDraft) -> Result<EnrollmentConfirmation, CommitError> {
        // Take the write lock up front: a deferred transaction that reads
        // first cannot be upgraded while another writer holds the lock.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(unavailable("commit.begin"))?;

        let valor_matricula =
            sqlx::query_scalar::<_, i64>("SELECT valor_matricula FROM classes WHERE id = ?")
                .bind(draft.classe_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unavailable("commit.classe"))?
                .ok_or(CommitError::ClasseMissing(draft.classe_id))?;

        let aluno_id = match &draft.aluno {
            AlunoSubmission::Novo(aluno) => insert_aluno(&mut tx, aluno).await?,
            AlunoSubmission::Existente { aluno_id } => *aluno_id,
        };

        for (index, responsavel) in draft.responsaveis.iter().enumerate() {
            insert_responsavel(&mut tx, aluno_id, index, responsavel).await?;
        }

        let inserted = sqlx::query(
            "INSERT INTO matriculas (aluno_id, classe_id, turma_id, ano_lectivo_id, data_matricula)
             SELECT ?, ?, ?, ?, ?
             WHERE (SELECT COUNT(*) FROM matriculas WHERE classe_id = ? AND turma_id = ?)
                 < (SELECT s.capacidade FROM turmas t JOIN salas s ON s.id = t.sala_id
                    WHERE t.id = ?)",
        )
        .bind(aluno_id.0)
        .bind(draft.classe_id.0)
        .bind(draft.turma_id.0)
        .bind(draft.ano_lectivo_id.0)
        .bind(draft.data_matricula)
        .bind(draft.classe_id.0)
        .bind(draft.turma_id.0)
        .bind(draft.turma_id.0)
        .execute(&mut *tx)
        .await
        .map_err(commit_error("matricula.insert", matricula_conflict))?;

        if inserted.rows_affected() == 0 {
            let seats = sqlx::query(
                "SELECT s.capacidade,
                        (SELECT COUNT(*) FROM matriculas WHERE classe_id = ? AND turma_id = ?)
                            AS ocupacao
                 FROM turmas t JOIN salas s ON s.id = t.sala_id
                 WHERE t.id = ?",
            )
            .bind(draft.classe_id.0)
            .bind(draft.turma_id.0)
            .bind(draft.turma_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable("commit.seats"))?
            .ok_or_else(|| {
                RepositoryError::Corrupt(format!("turma {} has no sala", draft.turma_id))
            })?;

            let capacidade = capacity_from(seats.try_get("capacidade").map_err(corrupt)?)?;
            let ocupacao = capacity_from(seats.try_get("ocupacao").map_err(corrupt)?)?;
            warn!(turma_id = %draft.turma_id, capacidade, ocupacao, "turma filled before commit");
            return Err(CommitError::CapacityExceeded {
                turma_id: draft.turma_id,
                capacidade,
                ocupacao,
            });
        }
        let matricula_id = MatriculaId(inserted.last_insert_rowid());

        sqlx::query(
            "INSERT INTO pagamentos (matricula_id, tipo, valor, metodo_pagamento_id, data_pagamento)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(matricula_id.0)
        .bind(PAGAMENTO_TIPO_MATRICULA)
        .bind(valor_matricula)
        .bind(draft.metodo_pagamento_id.0)
        .bind(draft.data_matricula)
        .execute(&mut *tx)
        .await
        .map_err(unavailable("pagamento.insert"))?;

        let confirmation = load_confirmation(&mut tx, matricula_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::Corrupt(format!("matricula {matricula_id} missing after insert"))
            })?;

        tx.commit().await.map_err(unavailable("commit"))?;
        Ok(confirmation)
    }
}
