use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use super::rejection::MalformedInput;

/// Upper bound on guardians per enrollment submission.
pub const MAX_RESPONSAVEIS: usize = 4;

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

entity_id!(
    /// Student identifier.
    AlunoId,
    /// Guardian identifier.
    ResponsavelId,
    ProfessorId,
    /// Class-year identifier.
    ClasseId,
    /// Section identifier.
    TurmaId,
    SalaId,
    TurnoId,
    CursoId,
    AnoLectivoId,
    MatriculaId,
    PagamentoId,
    MetodoPagamentoId,
    ParentescoId,
);

/// Postal address embedded in students and guardians.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endereco {
    pub municipio: String,
    pub bairro: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero_casa: Option<String>,
}

/// Phone is mandatory, e-mail optional; both unique per owner table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contacto {
    pub telefone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Contacto {
    pub fn telefone(&self) -> &str {
        self.telefone.trim()
    }

    /// Trimmed e-mail, treating blank strings as absent.
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    pub fn normalized(&self) -> Self {
        Self {
            telefone: self.telefone().to_string(),
            email: self.email().map(str::to_string),
        }
    }

    pub fn check_shape(&self, prefix: &str) -> Result<(), MalformedInput> {
        if !is_valid_phone(self.telefone()) {
            return Err(MalformedInput::new(
                format!("{prefix}contacto.telefone"),
                "must have 9 digits and start with 9",
            ));
        }
        if let Some(email) = self.email() {
            let valid = email
                .split_once('@')
                .map(|(user, domain)| !user.is_empty() && domain.contains('.'))
                .unwrap_or(false);
            if !valid {
                return Err(MalformedInput::new(
                    format!("{prefix}contacto.email"),
                    "must be a valid e-mail address",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Genero {
    #[serde(rename = "M")]
    Masculino,
    #[serde(rename = "F")]
    Feminino,
}

impl Genero {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Masculino => "M",
            Self::Feminino => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Self::Masculino),
            "F" => Some(Self::Feminino),
            _ => None,
        }
    }
}

/// Student registered as part of the enrollment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NovoAluno {
    pub nome_completo: String,
    #[serde(default)]
    pub nome_pai: Option<String>,
    #[serde(default)]
    pub nome_mae: Option<String>,
    pub numero_bi: String,
    pub data_nascimento: NaiveDate,
    pub genero: Genero,
    pub endereco: Endereco,
    pub contacto: Contacto,
}

/// Either a student to create or one registered beforehand.
///
/// On the wire, `alunoId` selects an existing student; any other object must
/// be a complete student record. Decoding goes through a flat payload so a bad
/// field is reported by name instead of as an unmatched variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AlunoSubmission {
    Novo(NovoAluno),
    #[serde(rename_all = "camelCase")]
    Existente { aluno_id: AlunoId },
}

impl<'de> Deserialize<'de> for AlunoSubmission {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        AlunoPayload::deserialize(deserializer)?
            .try_into()
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlunoPayload {
    aluno_id: Option<AlunoId>,
    nome_completo: Option<String>,
    nome_pai: Option<String>,
    nome_mae: Option<String>,
    numero_bi: Option<String>,
    data_nascimento: Option<NaiveDate>,
    genero: Option<Genero>,
    endereco: Option<Endereco>,
    contacto: Option<Contacto>,
}

impl TryFrom<AlunoPayload> for AlunoSubmission {
    type Error = String;

    fn try_from(payload: AlunoPayload) -> Result<Self, Self::Error> {
        if let Some(aluno_id) = payload.aluno_id {
            return Ok(Self::Existente { aluno_id });
        }

        Ok(Self::Novo(NovoAluno {
            nome_completo: required(payload.nome_completo, "nomeCompleto")?,
            nome_pai: payload.nome_pai,
            nome_mae: payload.nome_mae,
            numero_bi: required(payload.numero_bi, "numeroBi")?,
            data_nascimento: required(payload.data_nascimento, "dataNascimento")?,
            genero: required(payload.genero, "genero")?,
            endereco: required(payload.endereco, "endereco")?,
            contacto: required(payload.contacto, "contacto")?,
        }))
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("missing field `{field}`"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsavelSubmission {
    pub nome_completo: String,
    pub parentesco_id: ParentescoId,
    pub endereco: Endereco,
    pub contacto: Contacto,
}

/// Inbound enrollment request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSubmission {
    pub aluno: AlunoSubmission,
    #[serde(default)]
    pub responsaveis: Vec<ResponsavelSubmission>,
    pub classe_id: ClasseId,
    pub turma_id: TurmaId,
    pub metodo_pagamento_id: MetodoPagamentoId,
}

impl EnrollmentSubmission {
    /// Field-level checks that need no store access.
    pub fn check_shape(&self) -> Result<(), MalformedInput> {
        if self.responsaveis.len() > MAX_RESPONSAVEIS {
            return Err(MalformedInput::new(
                "responsaveis".to_string(),
                "at most 4 guardians per student",
            ));
        }

        if let AlunoSubmission::Novo(aluno) = &self.aluno {
            if aluno.nome_completo.trim().is_empty() {
                return Err(MalformedInput::new(
                    "aluno.nomeCompleto".to_string(),
                    "must not be empty",
                ));
            }
            if !is_valid_bi(aluno.numero_bi.trim()) {
                return Err(MalformedInput::new(
                    "aluno.numeroBi".to_string(),
                    "must be 9 digits, 2 uppercase letters and 3 digits",
                ));
            }
            aluno.contacto.check_shape("aluno.")?;
        }

        for (index, responsavel) in self.responsaveis.iter().enumerate() {
            if responsavel.nome_completo.trim().is_empty() {
                return Err(MalformedInput::new(
                    format!("responsaveis[{index}].nomeCompleto"),
                    "must not be empty",
                ));
            }
            responsavel
                .contacto
                .check_shape(&format!("responsaveis[{index}]."))?;
        }

        Ok(())
    }
}

fn is_valid_phone(phone: &str) -> bool {
    phone.len() == 9 && phone.starts_with('9') && phone.bytes().all(|b| b.is_ascii_digit())
}

fn is_valid_bi(numero_bi: &str) -> bool {
    let bytes = numero_bi.as_bytes();
    bytes.len() == 14
        && bytes[..9].iter().all(u8::is_ascii_digit)
        && bytes[9..11].iter().all(u8::is_ascii_uppercase)
        && bytes[11..].iter().all(u8::is_ascii_digit)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnoLectivo {
    pub id: AnoLectivoId,
    pub nome: String,
    pub inicio: NaiveDate,
    pub fim: NaiveDate,
    pub activo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classe {
    pub id: ClasseId,
    pub nome: String,
    pub curso_id: CursoId,
    pub ano_lectivo_id: AnoLectivoId,
    pub valor_matricula: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turma {
    pub id: TurmaId,
    pub nome: String,
    pub classe_id: ClasseId,
    pub sala_id: SalaId,
    pub turno_id: TurnoId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sala {
    pub id: SalaId,
    pub nome: String,
    pub capacidade: u32,
}

/// Seat usage of a section against its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurmaOccupancy {
    pub turma_id: TurmaId,
    pub capacidade: u32,
    pub ocupacao: u32,
    pub vagas: u32,
}

impl TurmaOccupancy {
    pub fn new(turma_id: TurmaId, capacidade: u32, ocupacao: u32) -> Self {
        Self {
            turma_id,
            capacidade,
            ocupacao,
            vagas: capacidade.saturating_sub(ocupacao),
        }
    }

    pub fn is_full(&self) -> bool {
        self.ocupacao >= self.capacidade
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    pub nome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlunoSummary {
    pub id: AlunoId,
    pub nome_completo: String,
    pub numero_bi: String,
    pub data_nascimento: NaiveDate,
    pub genero: Genero,
    pub endereco: Endereco,
    pub contacto: Contacto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagamentoSummary {
    pub id: PagamentoId,
    pub tipo: String,
    pub valor: i64,
    pub metodo_pagamento: String,
}

/// Payload returned once an enrollment is committed; feeds receipt generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentConfirmation {
    pub matricula_id: MatriculaId,
    pub data_matricula: NaiveDate,
    pub aluno: AlunoSummary,
    pub classe: NamedRef,
    pub curso: NamedRef,
    pub turma: NamedRef,
    pub turno: NamedRef,
    pub sala: NamedRef,
    pub ano_lectivo: NamedRef,
    pub pagamento: PagamentoSummary,
}

/// Payment type stamped on tuition rows created with an enrollment.
pub const PAGAMENTO_TIPO_MATRICULA: &str = "Matricula";

/// Tables whose rows carry a unique phone/e-mail pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactOwner {
    Aluno,
    Responsavel,
    Professor,
}

impl ContactOwner {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Aluno => "aluno",
            Self::Responsavel => "responsavel",
            Self::Professor => "professor",
        }
    }

    pub const fn table(self) -> &'static str {
        match self {
            Self::Aluno => "alunos",
            Self::Responsavel => "responsaveis",
            Self::Professor => "professores",
        }
    }
}
