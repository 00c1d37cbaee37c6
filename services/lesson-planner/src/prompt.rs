//! Lesson-plan prompt construction
//!
//! The prompt is written in Spanish, the language of the generated plans.

use crate::backend::CountryNorms;
use crate::catalog::{self, Inclusion, Mode};

const DEFAULT_FRAMEWORK: &str = "Estándares Internacionales";
const DEFAULT_TERMINOLOGY: &str = "Objetivos, Actividades, Evaluación";
const UNKNOWN_COUNTRY: &str = "el país seleccionado";

/// Curriculum framing the plan must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct CurriculumContext {
    pub country_name: String,
    pub framework: String,
    pub terminology: String,
}

impl CurriculumContext {
    /// Generic framing, used when the country has no normative record.
    pub fn defaults(country: &str) -> Self {
        Self {
            country_name: catalog::country(country)
                .map(|c| c.name)
                .unwrap_or(UNKNOWN_COUNTRY)
                .to_string(),
            framework: DEFAULT_FRAMEWORK.to_string(),
            terminology: DEFAULT_TERMINOLOGY.to_string(),
        }
    }
}

impl From<CountryNorms> for CurriculumContext {
    fn from(norms: CountryNorms) -> Self {
        Self {
            country_name: norms.country_name,
            framework: norms.curriculum_framework,
            terminology: norms.terminology,
        }
    }
}

/// Form fields that shape the prompt.
#[derive(Debug, Clone)]
pub struct PlanForm<'a> {
    pub topic: &'a str,
    pub grade: &'a str,
    pub mode: Mode,
    pub inclusions: Vec<&'static Inclusion>,
}

fn mode_instruction(mode: Mode) -> &'static str {
    match mode {
        Mode::Inspection => {
            "MODO INSPECCIÓN (Escudo Legal): La planeación debe ser ultra-detallada, con \
             justificación normativa exhaustiva, citas textuales del marco curricular y un tono \
             formal impecable para blindar al docente ante cualquier supervisión."
        }
        Mode::Practical => {
            "MODO PRÁCTICO (Supervivencia en el Aula): La planeación debe ser directa, al grano, \
             fácil de leer en medio de una clase, con tiempos reales y consejos de 'trinchera'."
        }
    }
}

fn inclusion_instruction(inclusions: &[&Inclusion]) -> String {
    if inclusions.is_empty() {
        "ATENCIÓN A LA DIVERSIDAD: Incluye sugerencias generales de diseño universal para el \
         aprendizaje."
            .to_string()
    } else {
        let labels = inclusions
            .iter()
            .map(|i| i.label)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "ATENCIÓN A LA DIVERSIDAD (Módulo Corazón Ético): Genera adaptaciones curriculares \
             específicas y detalladas para alumnos con: {labels}."
        )
    }
}

/// Assemble the full generation prompt.
///
/// Section 5 names the selected needs by catalog id.
pub fn build(context: &CurriculumContext, form: &PlanForm<'_>) -> String {
    let CurriculumContext {
        country_name,
        framework,
        terminology,
    } = context;
    let adaptations_for = if form.inclusions.is_empty() {
        "el grupo general".to_string()
    } else {
        form.inclusions
            .iter()
            .map(|i| i.id)
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "Actúa como un Docente Senior experto en el sistema educativo de {country_name}. \
Tu objetivo es generar una planeación que un supervisor califique con 10/10, pero que parezca \
escrita por un humano (de maestro a maestro).

DATOS DEL CONTEXTO:
- País: {country_name}
- Marco Curricular Oficial: {framework}
- Terminología Legal Obligatoria: {terminology}
- Tema: {topic}
- Grado: {grade}

CONFIGURACIÓN DE GENERACIÓN:
1. {mode}
2. {inclusion}

INSTRUCCIONES DE ESTILO (Para evitar el 'Vibe' de IA):
1. Lenguaje Práctico: No uses párrafos demasiado largos ni perfectos. Usa viñetas, términos que \
un docente usa en el pasillo y abreviaciones comunes del país (ej. en México: SEP, NEM, PDA).
2. Tiempos Quirúrgicos: Desglosa CADA actividad en minutos (ej: Pase de lista y encuadre: 5 min; \
Lluvia de ideas: 10 min).
3. Tono: Profesional pero listo para el combate diario en el salón de clases.

INSTRUCCIONES DE CONTENIDO (El 10 de Supervisión):
1. Aterrizaje al Aula:
   - Tiempos: Desglosa cada sesión con minutos específicos.
   - Dificultades: Añade una sección de 'Posibles retos en el aula' (ej. 'Los alumnos podrían \
confundir masa con peso').
2. Producto Tangible (ABP Real): Define un Producto Final Concreto al final del proyecto (ej. Una \
feria de experimentos, un mural comunitario).
3. Evidencias para Supervisión: Genera una Lista de Cotejo lista para imprimir y un espacio para \
Registro Anecdótico.
4. Aprendizaje Esperado: Redacta una frase clara al inicio: 'Al finalizar este proyecto, el \
estudiante será capaz de...'

ESTRUCTURA DE SALIDA (Markdown Limpio):
1. Ficha Técnica (Breve, alineada a {framework})
2. Aprendizaje Esperado (Frase clara)
3. Secuencia Didáctica (Inicio, Desarrollo, Cierre con tiempos minuto a minuto)
4. Posibles Retos en el Aula
5. Adaptaciones Curriculares (Detalladas para {adaptations_for})
6. Producto Final Tangible
7. Anexo: Lista de Cotejo (Formato tabla o lista verificable)

Usa ÚNICAMENTE la terminología oficial de {country_name} ({terminology}). NO mezcles términos \
de otros países.",
        topic = form.topic,
        grade = form.grade,
        mode = mode_instruction(form.mode),
        inclusion = inclusion_instruction(&form.inclusions),
    )
}
