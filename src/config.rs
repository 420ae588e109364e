use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, StudyError};

/// Tutor persona prepended to every answer prompt.
pub const SYSTEM_PROMPT: &str = "You are an expert educator and tutor with deep knowledge across all subjects.\n\
Your role is to help students understand complex concepts in simple, engaging ways.\n\
Always provide accurate, well-structured explanations.\n\
Cite your sources when referencing specific documents.\n\
Be encouraging and supportive in your responses.";

pub const QUIZ_SYSTEM_PROMPT: &str = "You are an expert quiz designer creating educational assessments.\n\
Generate clear, unambiguous multiple-choice questions that test understanding.\n\
Ensure options are plausible but clearly distinguished.\n\
Provide helpful explanations for why answers are correct or incorrect.";

pub const FLASHCARD_SYSTEM_PROMPT: &str = "You are an expert in creating study materials.\n\
Extract the most important Q&A pairs that capture key concepts.\n\
Make questions specific and answers concise but complete.\n\
Focus on testable knowledge that students need to master.";

/// Static application settings, read once at startup and immutable after.
#[derive(Debug, Clone)]
pub struct Config {
    // PDF processing
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub max_pdf_size_mb: u64,

    // Retrieval
    pub top_k_retrieval: usize,
    pub similarity_threshold: f32,

    // LLM
    pub llm_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub api_timeout_secs: u64,
    pub api_key: String,

    // Quiz
    pub default_quiz_questions: usize,
    pub min_quiz_questions: usize,
    pub max_quiz_questions: usize,

    // Flashcards
    pub default_flashcards: usize,
    pub min_flashcards: usize,
    pub max_flashcards: usize,

    // Feature flags
    pub enable_quiz_mode: bool,
    pub enable_flashcards: bool,
    pub enable_concept_explorer: bool,

    // Persistence
    pub cache_embeddings: bool,
    pub save_session_data: bool,
    pub vector_store_file: PathBuf,
    pub session_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_chunk_tokens: 400,
            overlap_tokens: 50,
            max_pdf_size_mb: 50,
            top_k_retrieval: 5,
            similarity_threshold: 0.5,
            llm_model: "models/gemini-2.5-flash-lite".to_string(),
            embedding_model: "models/gemini-embedding-001".to_string(),
            temperature: 0.7,
            max_output_tokens: 2048,
            api_timeout_secs: 30,
            api_key: String::new(),
            default_quiz_questions: 5,
            min_quiz_questions: 1,
            max_quiz_questions: 20,
            default_flashcards: 5,
            min_flashcards: 1,
            max_flashcards: 50,
            enable_quiz_mode: true,
            enable_flashcards: true,
            enable_concept_explorer: true,
            cache_embeddings: true,
            save_session_data: false,
            vector_store_file: PathBuf::from("data/vector_store/vector_store.json"),
            session_file: PathBuf::from("data/session_data.json"),
        }
    }
}

impl Config {
    /// Build a configuration from the environment, overlaying any set
    /// variables on the defaults. `GEMINI_API_KEY` is mandatory.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .map_err(|_| StudyError::Config("GEMINI_API_KEY is not set".to_string()))?;

        let mut config = Config {
            api_key,
            ..Config::default()
        };

        overlay(&mut config.max_chunk_tokens, "MAX_CHUNK_TOKENS")?;
        overlay(&mut config.overlap_tokens, "OVERLAP_TOKENS")?;
        overlay(&mut config.max_pdf_size_mb, "MAX_PDF_SIZE_MB")?;
        overlay(&mut config.top_k_retrieval, "TOP_K_RETRIEVAL")?;
        overlay(&mut config.similarity_threshold, "SIMILARITY_THRESHOLD")?;
        overlay(&mut config.temperature, "TEMPERATURE")?;
        overlay(&mut config.max_output_tokens, "MAX_OUTPUT_TOKENS")?;
        overlay(&mut config.api_timeout_secs, "API_TIMEOUT")?;
        overlay(&mut config.default_quiz_questions, "DEFAULT_QUIZ_QUESTIONS")?;
        overlay(&mut config.default_flashcards, "DEFAULT_FLASHCARDS")?;
        overlay(&mut config.enable_quiz_mode, "ENABLE_QUIZ_MODE")?;
        overlay(&mut config.enable_flashcards, "ENABLE_FLASHCARDS")?;
        overlay(&mut config.enable_concept_explorer, "ENABLE_CONCEPT_EXPLORER")?;
        overlay(&mut config.cache_embeddings, "CACHE_EMBEDDINGS")?;
        overlay(&mut config.save_session_data, "SAVE_SESSION_DATA")?;

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(path) = env::var("VECTOR_STORE_FILE") {
            config.vector_store_file = PathBuf::from(path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check numeric bounds. Violations are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_tokens == 0 {
            return Err(StudyError::Config(
                "MAX_CHUNK_TOKENS must be positive".to_string(),
            ));
        }
        if self.overlap_tokens >= self.max_chunk_tokens {
            return Err(StudyError::Config(format!(
                "OVERLAP_TOKENS ({}) must be smaller than MAX_CHUNK_TOKENS ({})",
                self.overlap_tokens, self.max_chunk_tokens
            )));
        }
        if self.top_k_retrieval == 0 {
            return Err(StudyError::Config(
                "TOP_K_RETRIEVAL must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(StudyError::Config(
                "TEMPERATURE must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(StudyError::Config(
                "SIMILARITY_THRESHOLD must be between 0 and 1".to_string(),
            ));
        }
        if self.default_quiz_questions < self.min_quiz_questions
            || self.default_quiz_questions > self.max_quiz_questions
        {
            return Err(StudyError::Config(
                "DEFAULT_QUIZ_QUESTIONS is outside the allowed quiz range".to_string(),
            ));
        }
        if self.default_flashcards < self.min_flashcards
            || self.default_flashcards > self.max_flashcards
        {
            return Err(StudyError::Config(
                "DEFAULT_FLASHCARDS is outside the allowed flashcard range".to_string(),
            ));
        }
        Ok(())
    }

    /// Token budget for assembled answer context.
    pub fn context_token_budget(&self) -> usize {
        self.max_chunk_tokens * self.top_k_retrieval
    }
}

fn overlay<T: FromStr>(slot: &mut T, key: &str) -> Result<()> {
    match env::var(key) {
        Ok(raw) => {
            *slot = raw
                .parse()
                .map_err(|_| StudyError::Config(format!("invalid value for {key}: {raw:?}")))?;
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let config = Config {
            max_chunk_tokens: 50,
            overlap_tokens: 50,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(StudyError::Config(_))));
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let config = Config {
            temperature: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn context_budget_scales_with_top_k() {
        let config = Config::default();
        assert_eq!(config.context_token_budget(), 400 * 5);
    }
}
