//! Form options: countries, grades per country, inclusion needs, modes

use serde::Serialize;

/// Country code whose plans skip the normative lookup.
pub const GENERIC_COUNTRY: &str = "OTRO";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Country {
    pub id: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Inclusion {
    pub id: &'static str,
    pub label: &'static str,
}

pub const COUNTRIES: &[Country] = &[
    Country { id: "MX", name: "México" },
    Country { id: "CO", name: "Colombia" },
    Country { id: "AR", name: "Argentina" },
    Country { id: "ES", name: "España" },
    Country { id: "CL", name: "Chile" },
    Country { id: "PE", name: "Perú" },
    Country { id: "US", name: "EE. UU. (Español)" },
    Country { id: "CA", name: "Centroamérica" },
    Country { id: "OTRO", name: "Otro / Genérico" },
];

pub const INCLUSIONS: &[Inclusion] = &[
    Inclusion { id: "tdah", label: "TDAH" },
    Inclusion { id: "autismo", label: "Autismo / TEA" },
    Inclusion { id: "rezago", label: "Rezago Educativo" },
    Inclusion { id: "dislexia", label: "Dislexia" },
    Inclusion { id: "altas_capacidades", label: "Altas Capacidades" },
];

/// How the plan is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Short, classroom-ready
    #[default]
    Practical,
    /// Exhaustive normative justification for supervision visits
    Inspection,
}

const MODES: &[Mode] = &[Mode::Practical, Mode::Inspection];

const GRADES_MX: &[&str] = &[
    "Preescolar", "1° Primaria", "2° Primaria", "3° Primaria", "4° Primaria", "5° Primaria",
    "6° Primaria", "1° Secundaria", "2° Secundaria", "3° Secundaria",
    "Bachillerato / Preparatoria", "Universidad / Facultad",
];

const GRADES_CO: &[&str] = &[
    "Preescolar / Transición", "1° Primaria", "2° Primaria", "3° Primaria", "4° Primaria",
    "5° Primaria", "6° Bachillerato", "7° Bachillerato", "8° Bachillerato", "9° Bachillerato",
    "10° Media", "11° Media", "Universidad",
];

const GRADES_ES: &[&str] = &[
    "Educación Infantil", "1° Primaria", "2° Primaria", "3° Primaria", "4° Primaria",
    "5° Primaria", "6° Primaria", "1° ESO", "2° ESO", "3° ESO", "4° ESO", "1° Bachillerato",
    "2° Bachillerato", "Formación Profesional", "Universidad",
];

const GRADES_AR: &[&str] = &[
    "Nivel Inicial", "1° Grado", "2° Grado", "3° Grado", "4° Grado", "5° Grado", "6° Grado",
    "7° Grado", "1° Año Secundaria", "2° Año Secundaria", "3° Año Secundaria",
    "4° Año Secundaria", "5° Año Secundaria", "6° Año Secundaria",
    "Nivel Superior / Universitario",
];

const GRADES_CL: &[&str] = &[
    "Educación Parvularia", "1° Básico", "2° Básico", "3° Básico", "4° Básico", "5° Básico",
    "6° Básico", "7° Básico", "8° Básico", "1° Medio", "2° Medio", "3° Medio", "4° Medio",
    "Educación Superior",
];

const GRADES_US: &[&str] = &[
    "Kindergarten", "1st Grade", "2nd Grade", "3rd Grade", "4th Grade", "5th Grade",
    "6th Grade (Middle School)", "7th Grade (Middle School)", "8th Grade (Middle School)",
    "9th Grade (High School)", "10th Grade (High School)", "11th Grade (High School)",
    "12th Grade (High School)", "College / University",
];

const GRADES_GENERIC: &[&str] = &[
    "Preescolar / Inicial", "Primaria (Grados 1-3)", "Primaria (Grados 4-6)",
    "Secundaria / Media", "Bachillerato / High School", "Universidad",
];

pub fn country(id: &str) -> Option<&'static Country> {
    COUNTRIES.iter().find(|c| c.id == id)
}

pub fn inclusion(id: &str) -> Option<&'static Inclusion> {
    INCLUSIONS.iter().find(|i| i.id == id)
}

/// Grades offered for a country. Countries without their own list get the generic one.
pub fn grades(country: &str) -> &'static [&'static str] {
    match country {
        "MX" => GRADES_MX,
        "CO" => GRADES_CO,
        "ES" => GRADES_ES,
        "AR" => GRADES_AR,
        "CL" => GRADES_CL,
        "US" => GRADES_US,
        _ => GRADES_GENERIC,
    }
}

/// Everything the plan form needs, as served by `GET /api/catalog`.
pub fn to_json() -> serde_json::Value {
    let grades: serde_json::Map<String, serde_json::Value> = COUNTRIES
        .iter()
        .map(|c| (c.id.to_string(), serde_json::json!(grades(c.id))))
        .collect();
    serde_json::json!({
        "countries": COUNTRIES,
        "grades": grades,
        "inclusions": INCLUSIONS,
        "modes": MODES,
    })
}
