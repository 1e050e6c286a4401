//! Static organisation chart: prefectures, their departments and the units
//! every department is split into. The academy sits outside the chart's
//! crime simulation.

/// Department that trains cadets; it never carries crime state.
pub const ACADEMY_DEPARTMENT: &str = "Sisekaitseakadeemia";
pub const ACADEMY_PREFECTURE: &str = "Sisekaitseakadeemia";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefecture {
    pub name: &'static str,
    pub departments: &'static [&'static str],
}

/// Units every regular department is organised into.
pub const UNITS: &[&str] = &[
    "Patrullteenistus",
    "Kriminaalteenistus",
    "Kiirreageerijad",
    "Liiklusjärelevalve",
];

pub const PREFECTURES: &[Prefecture] = &[
    Prefecture {
        name: "Põhja prefektuur",
        departments: &["Tallinn", "Harju"],
    },
    Prefecture {
        name: "Lõuna prefektuur",
        departments: &["Tartu", "Viljandi", "Võru"],
    },
    Prefecture {
        name: "Ida prefektuur",
        departments: &["Narva", "Jõhvi", "Rakvere"],
    },
    Prefecture {
        name: "Lääne prefektuur",
        departments: &["Pärnu", "Haapsalu", "Kuressaare"],
    },
];

pub fn is_academy(department: &str) -> bool {
    department == ACADEMY_DEPARTMENT
}

/// Prefecture owning `department`, if it is a known non-academy department.
pub fn prefecture_of(department: &str) -> Option<&'static str> {
    PREFECTURES
        .iter()
        .find(|p| p.departments.contains(&department))
        .map(|p| p.name)
}

/// Every non-academy department with its prefecture, in chart order.
pub fn departments() -> impl Iterator<Item = (&'static str, &'static str)> {
    PREFECTURES
        .iter()
        .flat_map(|p| p.departments.iter().map(move |d| (*d, p.name)))
}
