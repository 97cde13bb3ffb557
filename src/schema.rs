use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};

/// A named JSON schema the provider must conform its output to.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaConstraint {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Value,
    pub strict: bool,
}

/// Shape of [`crate::models::StudyMaterial`]. Kept in step with that type by hand.
pub static STUDY_MATERIAL_SCHEMA: Lazy<SchemaConstraint> = Lazy::new(|| SchemaConstraint {
    name: "smartnotes_output",
    description: "Structured AI output containing a summary, study flashcards, and multiple-choice quiz questions for student learning.",
    schema: json!({
        "type": "object",
        "properties": {
            "title": {
                "type": "string",
                "description": "2-20 character length title"
            },
            "summary": {
                "type": "string",
                "description": "A short, clear summary of the text in plain language that helps the student understand the main ideas."
            },
            "flashcards": {
                "type": "array",
                "description": "A list of study flashcards, each with a question and answer to help review key points.",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "A concise question that tests a key concept from the text."
                        },
                        "answer": {
                            "type": "string",
                            "description": "A clear, correct answer to the flashcard question."
                        }
                    },
                    "required": ["question", "answer"],
                    "additionalProperties": false
                }
            },
            "quiz_questions": {
                "type": "array",
                "description": "A list of multiple-choice quiz questions with options and the correct answer to test comprehension.",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "The text of the quiz question."
                        },
                        "options": {
                            "type": "array",
                            "description": "A list of 3-5 possible answers for the question.",
                            "items": { "type": "string" }
                        },
                        "correct": {
                            "type": "string",
                            "description": "The text of the correct answer, exactly matching one of the options."
                        }
                    },
                    "required": ["question", "options", "correct"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["title", "summary", "flashcards", "quiz_questions"],
        "additionalProperties": false
    }),
    strict: true,
});
