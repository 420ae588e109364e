use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use log::{error, info};

use study_rag::chunking::Chunk;
use study_rag::config::Config;
use study_rag::engine::StudyEngine;
use study_rag::error::{Result as StudyResult, StudyError};
use study_rag::gemini::{GeminiClient, GeminiConfig};
use study_rag::session::format_score;
use study_rag::study::{Difficulty, ExplanationType, QuizDifficulty, QuizQuestion};

/// A study assistant: chunks and indexes a document, then answers
/// questions, generates quizzes and flashcards from it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the document to study (PDF or plain text)
    #[arg(index = 1)]
    file_path: String,

    /// Explanation difficulty
    #[arg(long, value_enum, default_value = "college")]
    difficulty: Difficulty,

    /// Explanation style
    #[arg(long, value_enum, default_value = "explanation")]
    explanation: ExplanationType,

    /// Quiz difficulty
    #[arg(long, value_enum, default_value = "mixed")]
    quiz_difficulty: QuizDifficulty,

    /// Override the number of chunks retrieved per query
    #[arg(long)]
    top_k: Option<usize>,

    /// Override the minimum similarity for retrieved chunks
    #[arg(long)]
    threshold: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let path = Path::new(&args.file_path);
    if !path.exists() {
        error!("File not found: {}", args.file_path);
        return Err(anyhow::anyhow!("File not found"));
    }

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(top_k) = args.top_k {
        config.top_k_retrieval = top_k;
    }
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    config.validate().context("Invalid configuration")?;
    let gemini = GeminiClient::new(GeminiConfig::from_config(&config))
        .context("Failed to initialize Gemini client")?;
    let mut engine = StudyEngine::new(gemini, config);

    info!("Processing file: {}", args.file_path);
    let indexed = engine
        .process_document(path)
        .await
        .context("Failed to process document")?;
    println!("Indexed {indexed} chunks from {}", args.file_path);

    run_study_loop(&mut engine, &args).await
}

async fn run_study_loop(engine: &mut StudyEngine<GeminiClient>, args: &Args) -> Result<()> {
    println!(
        "Ask a question, or use /quiz [n], /cards [n], /explore <topic>, \
         /search <keyword> [query], /page <n>, /progress, /reset, /exit."
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("\n> ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        let outcome = match command {
            "/exit" | "exit" => break,
            "/quiz" => run_quiz(engine, rest, args.quiz_difficulty).await,
            "/cards" => run_flashcards(engine, rest).await,
            "/explore" => run_explore(engine, rest).await,
            "/search" => run_search(engine, rest).await,
            "/page" => {
                run_page(engine, rest);
                Ok(())
            }
            "/progress" => {
                println!("{}", engine.session.summary());
                Ok(())
            }
            "/reset" => engine.reset().map(|_| println!("Session cleared.")),
            _ => match engine
                .ask(line, args.difficulty, args.explanation)
                .await
            {
                Ok(answer) => {
                    println!("\n{answer}");
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        // A failed command aborts only the current action; history and
        // the index stay usable.
        if let Err(e) = outcome {
            error!("{e}");
            println!("Something went wrong: {e}");
        }
    }

    println!("Goodbye!");
    Ok(())
}

async fn run_quiz(
    engine: &mut StudyEngine<GeminiClient>,
    rest: &str,
    difficulty: QuizDifficulty,
) -> StudyResult<()> {
    let (topic, requested) = topic_and_count(rest, engine);
    let questions = engine.quiz(&topic, requested, difficulty).await?;
    if questions.is_empty() {
        println!("No material on '{topic}' to quiz from.");
        return Ok(());
    }

    let total = questions.len();
    let mut score = 0;
    for (i, question) in questions.iter().enumerate() {
        score += ask_question(i, question)?;
    }

    println!("\nScore: {}", format_score(score, total));
    engine.record_quiz_result(&topic, score, total);
    Ok(())
}

fn ask_question(index: usize, question: &QuizQuestion) -> StudyResult<usize> {
    println!("\nQ{}: {}", index + 1, question.question);
    let letters = ['A', 'B', 'C', 'D'];
    for (letter, option) in letters.iter().zip(question.options.iter()) {
        println!("  {letter}) {option}");
    }
    print!("Your answer: ");
    io::stdout().flush().ok();

    let mut reply = String::new();
    io::stdin()
        .read_line(&mut reply)
        .map_err(|e| StudyError::Session(e.to_string()))?;
    let reply = reply.trim().to_uppercase();

    let chosen = letters
        .iter()
        .position(|letter| reply == letter.to_string())
        .and_then(|i| question.options.get(i));

    if chosen.map(String::as_str) == Some(question.correct.as_str()) {
        println!("Correct!");
        Ok(1)
    } else {
        println!("Incorrect. Answer: {}", question.correct);
        if !question.explanation.is_empty() {
            println!("  {}", question.explanation);
        }
        Ok(0)
    }
}

async fn run_flashcards(
    engine: &mut StudyEngine<GeminiClient>,
    rest: &str,
) -> StudyResult<()> {
    let (topic, requested) = topic_and_count(rest, engine);
    let cards = engine.flashcards(&topic, requested).await?;
    if cards.is_empty() {
        println!("No material on '{topic}' to make flashcards from.");
        return Ok(());
    }

    for (i, card) in cards.iter().enumerate() {
        println!("\nCard {}/{}: {}", i + 1, cards.len(), card.question);
        print!("(press Enter to reveal) ");
        io::stdout().flush().ok();
        let mut pause = String::new();
        io::stdin().read_line(&mut pause).ok();
        println!("  {}", card.answer);

        print!("Mark for review? [y/N] ");
        io::stdout().flush().ok();
        let mut reply = String::new();
        io::stdin().read_line(&mut reply).ok();
        if reply.trim().eq_ignore_ascii_case("y") {
            engine.session.mark_card(i);
        }
    }
    Ok(())
}

async fn run_explore(
    engine: &mut StudyEngine<GeminiClient>,
    topic: &str,
) -> StudyResult<()> {
    if topic.is_empty() {
        println!("Usage: /explore <topic>");
        return Ok(());
    }
    let map = engine.explore(topic).await?;

    println!("\n{}", map.definition);
    print_list("Subtopics", &map.subtopics);
    print_list("Related concepts", &map.related);
    print_list("Applications", &map.applications);
    Ok(())
}

/// `/search wall` is a plain keyword lookup; `/search wall how do cell
/// walls form` narrows semantic retrieval for the query to chunks that
/// contain the keyword.
async fn run_search(engine: &StudyEngine<GeminiClient>, rest: &str) -> StudyResult<()> {
    let (keyword, query) = match rest.split_once(' ') {
        Some((keyword, query)) => (keyword, query.trim()),
        None => (rest, ""),
    };
    if keyword.is_empty() {
        println!("Usage: /search <keyword> [query]");
        return Ok(());
    }

    if query.is_empty() {
        let chunks = engine.keyword_search(keyword);
        if chunks.is_empty() {
            println!("No chunks contain '{keyword}'.");
        }
        for chunk in chunks {
            print_chunk_preview(chunk);
        }
        return Ok(());
    }

    let results = engine.hybrid_search(query, keyword).await?;
    if results.is_empty() {
        println!("No relevant chunks contain '{keyword}'.");
    }
    for result in &results {
        print_chunk_preview(&result.chunk);
    }
    Ok(())
}

fn run_page(engine: &StudyEngine<GeminiClient>, rest: &str) {
    let Ok(page_number) = rest.parse::<usize>() else {
        println!("Usage: /page <number>");
        return;
    };
    let chunks = engine.page_chunks(page_number);
    if chunks.is_empty() {
        println!("No chunks start on page {page_number}.");
    }
    for chunk in chunks {
        print_chunk_preview(chunk);
    }
}

fn print_chunk_preview(chunk: &Chunk) {
    let preview: String = chunk.text.chars().take(120).collect();
    println!("{} {preview}...", chunk.citation());
}

fn print_list(label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("\n{label}:");
    for item in items {
        println!("  - {item}");
    }
}

/// Parse `/quiz photosynthesis 5` style arguments: an optional trailing
/// count, the rest is the topic. An empty topic falls back to the last
/// question asked, or the whole document.
fn topic_and_count(rest: &str, engine: &StudyEngine<GeminiClient>) -> (String, usize) {
    let mut words: Vec<&str> = rest.split_whitespace().collect();
    let mut count = 5;
    if let Some(parsed) = words.last().and_then(|word| word.parse::<usize>().ok()) {
        count = parsed;
        words.pop();
    }

    let topic = if words.is_empty() {
        engine
            .session
            .chat_history
            .last()
            .map(|record| record.query.clone())
            .or_else(|| engine.active_document().map(str::to_string))
            .unwrap_or_else(|| "the document".to_string())
    } else {
        words.join(" ")
    };
    (topic, count)
}
