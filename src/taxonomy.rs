use std::collections::HashMap;
use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;

use crate::formats::UNKNOWN;

/// Built-in folder table: canonical folder name and the subject spellings routed to it.
const DEFAULT_GROUPS: &[(&str, &[&str])] = &[
    (
        "Mathematics",
        &[
            "Math",
            "Maths",
            "Mathematics",
            "Algebra",
            "Calculus",
            "Geometry",
            "Statistics",
            "Probability",
            "Linear Algebra",
            "Trigonometry",
        ],
    ),
    (
        "Physics",
        &["Physics", "Mechanics", "Electricity", "Thermodynamics", "Optics"],
    ),
    (
        "Chemistry",
        &["Chemistry", "Organic Chemistry", "Inorganic Chemistry", "Biochemistry"],
    ),
    (
        "Biology",
        &["Biology", "Genetics", "Anatomy", "Physiology", "Ecology", "Botany", "Zoology"],
    ),
    (
        "Computer Science",
        &[
            "Computer Science",
            "Programming",
            "Coding",
            "Software Engineering",
            "Python",
            "Javascript",
            "Web Development",
            "Data Science",
            "Machine Learning",
            "Artificial Intelligence",
            "Ai",
            "Algorithms",
            "Data Structures",
        ],
    ),
    (
        "Languages",
        &["English", "Arabic", "French", "German", "Spanish", "Grammar", "Vocabulary", "Ielts", "Toefl"],
    ),
    (
        "Business",
        &["Business", "Economics", "Accounting", "Finance", "Marketing", "Management"],
    ),
    (
        "Humanities",
        &["History", "Geography", "Philosophy", "Psychology", "Sociology", "Literature"],
    ),
    (
        "Medicine",
        &["Medicine", "Medical", "Pharmacy", "Nursing", "Dentistry", "Health"],
    ),
    ("Engineering", &["Engineering", "Electrical Engineering", "Civil Engineering", "Mechanical Engineering"]),
    (
        "Study",
        &["Study", "Study Notes", "Study Tips", "Study Skills", "Productivity", "Exam Preparation", "Revision"],
    ),
];

/// One entry of a taxonomy file.
#[derive(Debug, Clone, Deserialize)]
pub struct FolderGroup {
    pub folder: String,
    pub subjects: Vec<String>,
}

/// Maps normalized subjects to canonical folder names.
///
/// Groups keep their declaration order; when two groups list the same variant the
/// earlier one wins. Subjects no group lists are their own folder.
#[derive(Debug, Clone)]
pub struct SubjectTaxonomy {
    groups: Vec<FolderGroup>,
    index: HashMap<String, usize>,
}

impl SubjectTaxonomy {
    pub fn new(groups: Vec<FolderGroup>) -> Self {
        let mut index = HashMap::new();
        for (idx, group) in groups.iter().enumerate() {
            for variant in &group.subjects {
                index.entry(normalize_subject(variant)).or_insert(idx);
            }
        }
        Self { groups, index }
    }

    pub fn builtin() -> Self {
        Self::new(
            DEFAULT_GROUPS
                .iter()
                .map(|(folder, subjects)| FolderGroup {
                    folder: (*folder).to_owned(),
                    subjects: subjects.iter().map(|s| (*s).to_owned()).collect(),
                })
                .collect(),
        )
    }

    /// Reads a YAML list of `{folder, subjects}` entries.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read taxonomy: {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("parse taxonomy: {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let groups: Vec<FolderGroup> = serde_yaml::from_str(yaml).context("deserialize taxonomy")?;
        if let Some(group) = groups.iter().find(|g| g.folder.trim().is_empty()) {
            anyhow::bail!("taxonomy group has an empty folder name (subjects: {:?})", group.subjects);
        }
        Ok(Self::new(groups))
    }

    /// Folder for an already normalized subject.
    pub fn folder_for(&self, normalized_subject: &str) -> String {
        match self.index.get(normalized_subject) {
            Some(&idx) => self.groups[idx].folder.clone(),
            None => normalized_subject.to_owned(),
        }
    }
}

/// Collapses whitespace and title-cases each word. Blank input becomes `Unknown`.
pub fn normalize_subject(subject: &str) -> String {
    let normalized = subject
        .split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ");
    if normalized.is_empty() {
        UNKNOWN.to_owned()
    } else {
        normalized
    }
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}
