use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{self, Config};
use crate::error::{Result, StudyError};
use crate::retriever::RetrievalResult;
use crate::session::QuizAttempt;

/// Fixed reply when retrieval produced no usable context. The LLM is not
/// called in that case, so it cannot hallucinate an unsupported answer.
pub const UNSUPPORTED_ANSWER: &str =
    "The provided material does not contain information that supports an answer to this question. \
Try rephrasing, or upload a document that covers the topic.";

/// Narrow seam over the hosted LLM so the generator can be tested with a
/// substitutable fake.
#[allow(async_fn_in_trait)]
pub trait LanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// How deep the explanation should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Difficulty {
    Eli5,
    HighSchool,
    College,
    Advanced,
}

impl Difficulty {
    pub fn instruction(&self) -> &'static str {
        match self {
            Difficulty::Eli5 => {
                "Explain as if explaining to a 5-year-old. Use simple words and everyday analogies."
            }
            Difficulty::HighSchool => {
                "Provide a clear explanation suitable for high school level understanding."
            }
            Difficulty::College => {
                "Provide a detailed college-level explanation with technical terms."
            }
            Difficulty::Advanced => {
                "Provide an advanced, in-depth explanation with nuanced details and advanced concepts."
            }
        }
    }
}

/// What shape the explanation should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExplanationType {
    Explanation,
    Analogy,
    StepByStep,
}

impl ExplanationType {
    pub fn instruction(&self) -> &'static str {
        match self {
            ExplanationType::Explanation => "Provide a comprehensive explanation.",
            ExplanationType::Analogy => "Use relatable analogies and metaphors to explain.",
            ExplanationType::StepByStep => {
                "Break down the concept into clear, numbered steps."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QuizDifficulty {
    Easy,
    Medium,
    Hard,
    Mixed,
}

impl QuizDifficulty {
    pub fn label(&self) -> &'static str {
        match self {
            QuizDifficulty::Easy => "Easy",
            QuizDifficulty::Medium => "Medium",
            QuizDifficulty::Hard => "Hard",
            QuizDifficulty::Mixed => "Mixed",
        }
    }
}

/// One multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

/// Related-concept overview for the concept explorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptMap {
    pub definition: String,
    #[serde(default)]
    pub subtopics: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub applications: Vec<String>,
}

/// Generate a cited answer from retrieved context.
///
/// The prompt is deterministic for a fixed input: chunks are embedded in
/// descending-score order with citation markers, capped by the context
/// token budget, followed by the difficulty and formatting instructions
/// and the question itself.
pub async fn generate_answer<L: LanguageModel>(
    llm: &L,
    query: &str,
    results: &[RetrievalResult],
    difficulty: Difficulty,
    explanation_type: ExplanationType,
    config: &Config,
) -> Result<String> {
    if results.is_empty() {
        info!("No context cleared the threshold; answering without the LLM");
        return Ok(UNSUPPORTED_ANSWER.to_string());
    }

    let context = build_context(results, config.context_token_budget());
    let prompt = build_answer_prompt(query, &context, difficulty, explanation_type);

    let answer = llm.generate(&prompt).await?;
    info!(
        "Generated answer for query: {}",
        query.chars().take(50).collect::<String>()
    );
    Ok(answer.trim().to_string())
}

/// Assemble context text in descending-score order, stopping before the
/// token budget is exceeded.
fn build_context(results: &[RetrievalResult], token_budget: usize) -> String {
    let mut ordered: Vec<&RetrievalResult> = results.iter().collect();
    ordered.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.chunk.order_index.cmp(&b.chunk.order_index))
    });

    let mut context = String::new();
    let mut used_tokens = 0;
    for result in ordered {
        if used_tokens + result.chunk.token_count > token_budget {
            break;
        }
        context.push_str(&result.chunk.citation());
        context.push('\n');
        context.push_str(&result.chunk.text);
        context.push_str("\n\n");
        used_tokens += result.chunk.token_count;
    }
    context
}

fn build_answer_prompt(
    query: &str,
    context: &str,
    difficulty: Difficulty,
    explanation_type: ExplanationType,
) -> String {
    format!(
        "{system}\n\n\
Answer the following question using ONLY the CONTEXT provided.\n\
{difficulty}\n{explanation}\n\
Cite sources inline in the format [DocName:pageX]. Do not make up information.\n\n\
CONTEXT:\n{context}\n\
QUESTION: {query}",
        system = config::SYSTEM_PROMPT,
        difficulty = difficulty.instruction(),
        explanation = explanation_type.instruction(),
    )
}

/// Generate a multiple-choice quiz about a topic.
///
/// The previous attempt, if any, nudges difficulty: above 80% the prompt
/// asks for slightly harder questions, below 40% slightly easier. A reply
/// that cannot be parsed as JSON falls back to a deterministic quiz built
/// from context sentences.
pub async fn generate_quiz<L: LanguageModel>(
    llm: &L,
    topic: &str,
    results: &[RetrievalResult],
    num_questions: usize,
    difficulty: QuizDifficulty,
    last_attempt: Option<&QuizAttempt>,
) -> Result<Vec<QuizQuestion>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }

    let adaptation = match last_attempt {
        Some(attempt) if attempt.total > 0 => {
            let percent = attempt.score as f32 / attempt.total as f32 * 100.0;
            if percent > 80.0 {
                "Make questions slightly harder."
            } else if percent < 40.0 {
                "Make questions slightly easier."
            } else {
                ""
            }
        }
        _ => "",
    };

    let context = join_context_texts(results, 10);
    let prompt = format!(
        "{system}\n\n\
Generate {num_questions} multiple choice questions about {topic} based on the text below.\n\
Difficulty: {difficulty}. {adaptation}\n\
Format strictly as JSON array:\n\
[\n  {{\n    \"question\": \"Question text?\",\n    \"options\": [\"Option A\", \"Option B\", \"Option C\", \"Option D\"],\n    \"correct\": \"Correct option text\",\n    \"explanation\": \"Explanation text\"\n  }}\n]\n\n\
TEXT:\n{context}",
        system = config::QUIZ_SYSTEM_PROMPT,
        difficulty = difficulty.label(),
    );

    let raw = llm.generate(&prompt).await?;
    match parse_json_block::<Vec<QuizQuestion>>(&raw, '[', ']') {
        Some(mut questions) => {
            for question in &mut questions {
                question.question = question.question.trim().to_string();
                question.correct = question.correct.trim().to_string();
                question.explanation = question.explanation.trim().to_string();
                for option in &mut question.options {
                    *option = option.trim().to_string();
                }
            }
            questions.truncate(num_questions);
            info!("Generated {} quiz questions", questions.len());
            Ok(questions)
        }
        None => {
            warn!("Quiz reply was not valid JSON; building fallback quiz from context");
            Ok(fallback_quiz(results, num_questions))
        }
    }
}

/// Generate flashcard Q&A pairs about a topic.
pub async fn generate_flashcards<L: LanguageModel>(
    llm: &L,
    topic: &str,
    results: &[RetrievalResult],
    num_cards: usize,
) -> Result<Vec<Flashcard>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }

    let context = join_context_texts(results, 3);
    let prompt = format!(
        "{system}\n\n\
Generate {num_cards} educational flashcards about {topic} from this content.\n\
Each flashcard should have a clear question and concise answer.\n\n\
Guidelines:\n\
- Questions should be clear and specific\n\
- Answers should be concise but informative\n\
- Focus on key concepts and definitions\n\
- Keep answers under 100 words\n\n\
Format as clean JSON with this structure:\n\
[\n  {{\n    \"question\": \"What is X?\",\n    \"answer\": \"Clear, concise definition of X.\"\n  }}\n]\n\n\
Content:\n{context}",
        system = config::FLASHCARD_SYSTEM_PROMPT,
    );

    let raw = llm.generate(&prompt).await?;
    match parse_json_block::<Vec<Flashcard>>(&raw, '[', ']') {
        Some(mut cards) => {
            cards.truncate(num_cards);
            info!("Generated {} flashcards for topic: {topic}", cards.len());
            Ok(cards)
        }
        None => {
            warn!("Flashcard reply was not valid JSON; deriving cards from the reply text");
            Ok(fallback_flashcards(&raw, num_cards))
        }
    }
}

/// Explore a concept: definition, subtopics, related ideas, applications.
pub async fn generate_concept_map<L: LanguageModel>(
    llm: &L,
    topic: &str,
    results: &[RetrievalResult],
) -> Result<ConceptMap> {
    if results.is_empty() {
        return Err(StudyError::Generation(format!(
            "no source material covers '{topic}'"
        )));
    }

    let context = join_context_texts(results, 3);
    let prompt = format!(
        "Analyze the following text about '{topic}' and extract:\n\
1. Main concept definition (2-3 sentences)\n\
2. Key subtopics (list 3-5)\n\
3. Related concepts (list 3-5)\n\
4. Real-world applications (list 2-3)\n\n\
Format as JSON:\n\
{{\n  \"definition\": \"...\",\n  \"subtopics\": [...],\n  \"related\": [...],\n  \"applications\": [...]\n}}\n\n\
Return ONLY JSON, no other text.\n\n\
TEXT:\n{context}"
    );

    let raw = llm.generate(&prompt).await?;
    parse_json_block::<ConceptMap>(&raw, '{', '}').ok_or_else(|| {
        StudyError::Generation(format!("concept map reply for '{topic}' was not valid JSON"))
    })
}

fn join_context_texts(results: &[RetrievalResult], limit: usize) -> String {
    results
        .iter()
        .take(limit)
        .map(|result| result.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Extract and deserialize the outermost JSON block from an LLM reply,
/// tolerating prose or code fences around it.
fn parse_json_block<T: serde::de::DeserializeOwned>(
    raw: &str,
    open: char,
    close: char,
) -> Option<T> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

/// Deterministic quiz built from context sentences, used when the LLM
/// reply cannot be parsed. Each question asks which statement appears in
/// the material; distractors are drawn from the following sentences.
fn fallback_quiz(results: &[RetrievalResult], num_questions: usize) -> Vec<QuizQuestion> {
    let sentences: Vec<String> = results
        .iter()
        .flat_map(|result| split_sentences(&result.chunk.text))
        .collect();

    let mut quiz = Vec::new();
    for i in 0..num_questions.min(sentences.len()) {
        let correct = sentences[i].clone();
        let mut options = vec![correct.clone()];
        for offset in 1..sentences.len() {
            if options.len() == 4 {
                break;
            }
            let candidate = &sentences[(i + offset) % sentences.len()];
            if !options.contains(candidate) {
                options.push(candidate.clone());
            }
        }
        quiz.push(QuizQuestion {
            question: "Which of these statements appears in the source material?".to_string(),
            options,
            correct,
            explanation: "Taken directly from the retrieved context.".to_string(),
        });
    }
    quiz
}

/// Flashcards derived from the raw reply when JSON parsing fails.
fn fallback_flashcards(raw: &str, num_cards: usize) -> Vec<Flashcard> {
    split_sentences(raw)
        .into_iter()
        .take(num_cards)
        .map(|sentence| {
            let question: String = sentence.chars().take(120).collect();
            let answer: String = sentence.chars().take(240).collect();
            Flashcard {
                question: format!("{question}?"),
                answer,
            }
        })
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split_terminator(['.', '?', '!'])
        .map(str::trim)
        .filter(|sentence| sentence.len() > 20)
        .map(str::to_string)
        .collect()
}
