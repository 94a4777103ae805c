//! Deterministic prompt construction for the coding phases.
//!
//! A prompt is a pure function of the registry snapshot, the optional
//! operator instructions, and the case payload. The registry is rendered
//! deduplicated and sorted so that two runs with the same registry state
//! produce byte-identical prompts.

use super::registry::ConsistencyRegistry;
use super::types::CaseRecord;

/// System prompt shared by every coding phase.
pub const SYSTEM_PROMPT: &str = "You are an expert qualitative researcher performing \
thematic analysis of crime case records. Work precisely and reply with a single JSON \
object and nothing else.";

/// Which labeling pass the engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingTask {
    /// Phase 2: assign short behavioral codes to a case narrative.
    InitialCodes,
    /// Phase 3: group a case's initial codes into a candidate theme.
    CandidateThemes,
    /// Phase 4: assign one consolidated final theme to a case.
    FinalThemeAssignment,
}

impl CodingTask {
    pub fn task_description(&self) -> &'static str {
        match self {
            CodingTask::InitialCodes => {
                "Generate an initial code for the case below. When defining the code be \
                 consistent with the codes already identified so that similar cases are \
                 coded consistently, but stay as specific as possible rather than falling \
                 back to general labels."
            }
            CodingTask::CandidateThemes => {
                "Group the initial codes of the case below into one candidate theme. Be \
                 consistent with the candidate themes already identified; only introduce \
                 a new theme when none of the existing ones fits."
            }
            CodingTask::FinalThemeAssignment => {
                "Assign one of the consolidated final themes to the case below. The theme \
                 set is mutually exclusive; only introduce a new theme when absolutely \
                 necessary."
            }
        }
    }

    pub fn inventory_header(&self) -> &'static str {
        match self {
            CodingTask::InitialCodes => "ALREADY IDENTIFIED INITIAL CODES",
            CodingTask::CandidateThemes => "ALREADY IDENTIFIED CANDIDATE THEMES",
            CodingTask::FinalThemeAssignment => "ALREADY IDENTIFIED FINAL THEMES",
        }
    }

    pub fn first_batch_note(&self) -> &'static str {
        match self {
            CodingTask::InitialCodes => {
                "This is the first batch. No initial codes have been assigned yet."
            }
            CodingTask::CandidateThemes => {
                "This is the first batch. Hence, there are no candidate themes identified yet."
            }
            CodingTask::FinalThemeAssignment => {
                "This is the first batch. No final themes have been assigned yet."
            }
        }
    }

    /// Corpus field this task writes.
    pub fn output_field(&self) -> &'static str {
        match self {
            CodingTask::InitialCodes => "codes",
            CodingTask::CandidateThemes => "candidate_theme",
            CodingTask::FinalThemeAssignment => "final_theme",
        }
    }

    /// The part of the case fed to the model as the analysis target.
    pub fn payload(&self, case: &CaseRecord) -> String {
        match self {
            CodingTask::InitialCodes => case.text.clone(),
            CodingTask::CandidateThemes => case
                .codes
                .iter()
                .map(|code| format!("- {code}"))
                .collect::<Vec<_>>()
                .join("\n"),
            CodingTask::FinalThemeAssignment => {
                let codes = case
                    .codes
                    .iter()
                    .map(|code| format!("- {code}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                match &case.candidate_theme {
                    Some(theme) => format!("Initial codes:\n{codes}\nCandidate theme: {theme}"),
                    None => format!("Initial codes:\n{codes}"),
                }
            }
        }
    }

    /// Existing output of this task on a case, for resume detection and
    /// registry seeding.
    pub fn output_of(&self, case: &CaseRecord) -> Option<Vec<String>> {
        match self {
            CodingTask::InitialCodes => {
                (!case.codes.is_empty()).then(|| case.codes.clone())
            }
            CodingTask::CandidateThemes => {
                case.candidate_theme.as_ref().map(|theme| vec![theme.clone()])
            }
            CodingTask::FinalThemeAssignment => {
                case.final_theme.as_ref().map(|theme| vec![theme.clone()])
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    task: CodingTask,
    instructions: Option<String>,
}

impl PromptBuilder {
    pub fn new(task: CodingTask) -> Self {
        Self {
            task,
            instructions: None,
        }
    }

    /// Operator-supplied free text, embedded verbatim in its own section.
    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions.filter(|text| !text.trim().is_empty());
        self
    }

    pub fn build(&self, registry: &ConsistencyRegistry, case_id: &str, payload: &str) -> String {
        let inventory = if registry.is_empty() {
            self.task.first_batch_note().to_string()
        } else {
            registry
                .unique_sorted()
                .iter()
                .map(|entry| format!("- {}", entry.replace('\n', " ")))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut prompt = format!(
            "{}\n\n{}\n{}\n",
            self.task.task_description(),
            self.task.inventory_header(),
            inventory
        );

        if let Some(instructions) = &self.instructions {
            prompt.push_str(&format!(
                "\nSPECIAL INSTRUCTIONS\n{}\n\nPrioritize these instructions while \
                 maintaining accuracy and consistency with the inventory above.\n",
                instructions.trim()
            ));
        }

        prompt.push_str(&format!(
            "\nTHE DATA POINT TO BE ANALYZED\nID: {case_id}\n{payload}\n---\n\n\
             Reply with a JSON object of the form {{\"{case_id}\": \"<label>\"}}.\n"
        ));

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str) -> CaseRecord {
        CaseRecord {
            id: id.to_string(),
            text: "bicycle stolen from yard".to_string(),
            codes: vec!["bicycle_theft_outdoor".to_string()],
            candidate_theme: None,
            final_theme: None,
        }
    }

    #[test]
    fn empty_registry_renders_first_batch_note() {
        let builder = PromptBuilder::new(CodingTask::InitialCodes);
        let prompt = builder.build(&ConsistencyRegistry::new(), "1", "some narrative");
        assert!(prompt.contains("This is the first batch."));
        assert!(prompt.contains("ID: 1"));
    }

    #[test]
    fn registry_renders_sorted_and_deduplicated() {
        let mut registry = ConsistencyRegistry::new();
        registry.append(&["zeta".to_string(), "alpha".to_string(), "zeta".to_string()]);

        let builder = PromptBuilder::new(CodingTask::InitialCodes);
        let prompt = builder.build(&registry, "1", "text");

        let alpha = prompt.find("- alpha").unwrap();
        let zeta = prompt.find("- zeta").unwrap();
        assert!(alpha < zeta);
        assert_eq!(prompt.matches("- zeta").count(), 1);
    }

    #[test]
    fn newlines_in_entries_are_flattened() {
        let mut registry = ConsistencyRegistry::new();
        registry.append(&["multi\nline code".to_string()]);
        let prompt = PromptBuilder::new(CodingTask::InitialCodes).build(&registry, "1", "t");
        assert!(prompt.contains("- multi line code"));
    }

    #[test]
    fn instructions_appear_verbatim_in_their_own_section() {
        let builder = PromptBuilder::new(CodingTask::InitialCodes)
            .with_instructions(Some("Use Czech legal terminology.".to_string()));
        let prompt = builder.build(&ConsistencyRegistry::new(), "1", "t");
        assert!(prompt.contains("SPECIAL INSTRUCTIONS\nUse Czech legal terminology."));
    }

    #[test]
    fn blank_instructions_are_dropped() {
        let builder =
            PromptBuilder::new(CodingTask::InitialCodes).with_instructions(Some("   ".to_string()));
        let prompt = builder.build(&ConsistencyRegistry::new(), "1", "t");
        assert!(!prompt.contains("SPECIAL INSTRUCTIONS"));
    }

    #[test]
    fn prompt_is_deterministic_for_a_registry_state() {
        let mut registry = ConsistencyRegistry::new();
        registry.append(&["b".to_string(), "a".to_string()]);
        let builder = PromptBuilder::new(CodingTask::CandidateThemes);
        assert_eq!(
            builder.build(&registry, "7", "payload"),
            builder.build(&registry, "7", "payload")
        );
    }

    #[test]
    fn payload_varies_by_task() {
        let record = case("1");
        assert_eq!(
            CodingTask::InitialCodes.payload(&record),
            "bicycle stolen from yard"
        );
        assert_eq!(
            CodingTask::CandidateThemes.payload(&record),
            "- bicycle_theft_outdoor"
        );
        assert!(CodingTask::FinalThemeAssignment
            .payload(&record)
            .starts_with("Initial codes:"));
    }

    #[test]
    fn output_of_reflects_the_task_field() {
        let mut record = case("1");
        assert_eq!(
            CodingTask::InitialCodes.output_of(&record),
            Some(vec!["bicycle_theft_outdoor".to_string()])
        );
        assert_eq!(CodingTask::CandidateThemes.output_of(&record), None);

        record.candidate_theme = Some("outdoor_property_theft".to_string());
        assert_eq!(
            CodingTask::CandidateThemes.output_of(&record),
            Some(vec!["outdoor_property_theft".to_string()])
        );
    }
}
