//! Persona prompt construction.
//!
//! The prompt is plain text assembled from a [`PersonaTemplate`]:
//!
//! ```text
//! <identity>
//! <instruction>
//!
//! <rules heading>
//! 1. <rule>
//! ...
//! N. <emotion rule> <tag> <tag> ...
//!
//! <prohibitions heading>
//! - <prohibition>
//!
//! <problem label><problem>
//!
//! <teacher label>: <message>
//! <student label>:
//! ```
//!
//! Problem and message text are copied in, never interpreted. A line inside
//! either slot that starts with a speaker label is indented so that turn
//! markers only ever appear where the builder puts them.

use std::borrow::Cow;

use crate::config::PersonaTemplate;

/// Builds persona-conditioned prompts. Pure: no I/O, same input, same output.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    template: PersonaTemplate,
}

impl PromptBuilder {
    /// Creates a builder for the given persona.
    #[must_use]
    pub const fn new(template: PersonaTemplate) -> Self {
        Self { template }
    }

    /// Builds the persona instruction block with `problem` in its slot.
    #[must_use]
    pub fn system_prompt(&self, problem: &str) -> String {
        let t = &self.template;
        let mut out = String::new();

        out.push('\n');
        out.push_str(&t.identity);
        out.push('\n');
        if !t.instruction.is_empty() {
            out.push_str(&t.instruction);
            out.push('\n');
        }

        let mut rules: Vec<Cow<'_, str>> = t.rules.iter().map(|r| Cow::from(r.as_str())).collect();
        if !t.emotion_tags.is_empty() {
            rules.push(Cow::Owned(format!(
                "{}{}",
                t.emotion_rule,
                t.emotion_tags.join(" ")
            )));
        }
        if !rules.is_empty() {
            out.push('\n');
            out.push_str(&t.rules_heading);
            out.push('\n');
            for (i, rule) in rules.iter().enumerate() {
                out.push_str(&format!("{}. {rule}\n", i + 1));
            }
        }

        if !t.prohibitions.is_empty() {
            out.push('\n');
            out.push_str(&t.prohibitions_heading);
            out.push('\n');
            for prohibition in &t.prohibitions {
                out.push_str("- ");
                out.push_str(prohibition);
                out.push('\n');
            }
        }

        out.push('\n');
        out.push_str(&t.problem_label);
        out.push_str(&self.guard_slot(problem));
        out.push('\n');
        out
    }

    /// Builds the full prompt: persona block, the teacher's turn, and the
    /// cue where the student's reply begins.
    #[must_use]
    pub fn full_prompt(&self, problem: &str, teacher_message: &str) -> String {
        let mut out = self.system_prompt(problem);
        out.push('\n');
        out.push_str(&self.teacher_marker());
        out.push(' ');
        out.push_str(&self.guard_slot(teacher_message));
        out.push('\n');
        out.push_str(&self.student_cue());
        out
    }

    /// The marker opening the teacher's turn, e.g. `先生:`.
    #[must_use]
    pub fn teacher_marker(&self) -> String {
        format!("{}:", self.template.teacher_label)
    }

    /// The cue where the student's reply begins, e.g. `児童:`.
    #[must_use]
    pub fn student_cue(&self) -> String {
        format!("{}:", self.template.student_label)
    }

    /// Indents any line of slot text that would read as a speaker marker.
    fn guard_slot<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let labels = [
            self.template.teacher_label.as_str(),
            self.template.student_label.as_str(),
        ];
        let looks_like_marker = |line: &str| {
            let line = line.trim_start();
            labels.iter().any(|label| {
                line.strip_prefix(label)
                    .is_some_and(|rest| rest.starts_with(':') || rest.starts_with('：'))
            })
        };

        // The first line follows a label on the same output line, so only
        // continuation lines can start a new turn.
        if !text.lines().skip(1).any(looks_like_marker) {
            return Cow::Borrowed(text);
        }

        let mut guarded = String::with_capacity(text.len() + 8);
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                guarded.push('\n');
                if looks_like_marker(line) {
                    guarded.push_str("  ");
                }
            }
            guarded.push_str(line);
        }
        Cow::Owned(guarded)
    }
}
