use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::chunking::{chunk_document, Chunk};
use crate::config::Config;
use crate::document::Document;
use crate::embeddings::Embedder;
use crate::error::{Result, StudyError};
use crate::retriever::{self, RetrievalResult};
use crate::session::SessionState;
use crate::store::{content_hash, VectorStore};
use crate::study::{
    self, ConceptMap, Difficulty, ExplanationType, Flashcard, LanguageModel, QuizDifficulty,
    QuizQuestion,
};

/// Orchestrates the study pipeline: upload -> chunk -> embed -> index,
/// then query -> retrieve -> generate -> record.
///
/// One engine serves one logical session. Each operation runs to
/// completion before the next; an index rebuild for a new upload finishes
/// before queries against that document are served.
pub struct StudyEngine<P> {
    provider: P,
    config: Config,
    store: VectorStore,
    active_document: Option<String>,
    pub session: SessionState,
}

impl<P: Embedder + LanguageModel> StudyEngine<P> {
    pub fn new(provider: P, config: Config) -> Self {
        let mut session = if config.save_session_data {
            match SessionState::load(&config.session_file) {
                Ok(Some(state)) => state,
                Ok(None) => SessionState::new(),
                Err(e) => {
                    warn!("Could not restore session: {e}");
                    SessionState::new()
                }
            }
        } else {
            SessionState::new()
        };
        session.begin_session();

        StudyEngine {
            provider,
            config,
            store: VectorStore::new(),
            active_document: None,
            session,
        }
    }

    pub fn active_document(&self) -> Option<&str> {
        self.active_document.as_deref()
    }

    pub fn indexed_chunks(&self) -> usize {
        self.store.len()
    }

    /// Extract, chunk, embed and index a document. Returns the number of
    /// indexed chunks. If a snapshot already covers this exact content,
    /// the cached embeddings are reused and no API calls are made.
    pub async fn process_document(&mut self, path: &Path) -> Result<usize> {
        let bytes = fs::read(path).map_err(|e| StudyError::Extraction {
            document: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StudyError::Extraction {
                document: path.display().to_string(),
                reason: "invalid file name".to_string(),
            })?;
        let hash = content_hash(&bytes);

        if self.config.cache_embeddings {
            // An unreadable snapshot is a cache miss, not a failed upload.
            match VectorStore::load(&self.config.vector_store_file) {
                Ok(Some(snapshot)) if snapshot.is_current(name, &hash) => {
                    info!("Reusing cached embeddings for {name}");
                    self.store = snapshot;
                    self.active_document = Some(name.to_string());
                    return Ok(self.store.len());
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring unreadable vector store snapshot: {e}"),
            }
        }

        let document = Document::from_bytes(name, &bytes, self.config.max_pdf_size_mb)?;
        let chunks = chunk_document(
            &document,
            self.config.max_chunk_tokens,
            self.config.overlap_tokens,
        )?;

        let mut store = retriever::build_index(&self.provider, chunks).await?;
        store.record_document(name, hash);

        if self.config.cache_embeddings {
            if let Err(e) = store.save(&self.config.vector_store_file) {
                // A failed snapshot write only loses the cache.
                warn!("Could not save vector store snapshot: {e}");
            }
        }

        self.store = store;
        self.active_document = Some(name.to_string());
        Ok(self.store.len())
    }

    /// Answer a question from the indexed material and record it in the
    /// session history. Retrieval or generation failures propagate
    /// without touching the history already recorded.
    pub async fn ask(
        &mut self,
        question: &str,
        difficulty: Difficulty,
        explanation_type: ExplanationType,
    ) -> Result<String> {
        let results = self.retrieve(question).await?;
        let answer = study::generate_answer(
            &self.provider,
            question,
            &results,
            difficulty,
            explanation_type,
            &self.config,
        )
        .await?;

        let citations = results.iter().map(|r| r.chunk.citation()).collect();
        self.session.record_answer(question, &answer, citations);
        self.autosave();
        Ok(answer)
    }

    /// Generate a quiz on a topic. Uses the most recent attempt on the
    /// same topic to adapt difficulty.
    pub async fn quiz(
        &mut self,
        topic: &str,
        num_questions: usize,
        difficulty: QuizDifficulty,
    ) -> Result<Vec<QuizQuestion>> {
        if !self.config.enable_quiz_mode {
            return Err(StudyError::Config("quiz mode is disabled".to_string()));
        }
        let num_questions = num_questions.clamp(
            self.config.min_quiz_questions,
            self.config.max_quiz_questions,
        );

        let results = self.retrieve(topic).await?;
        let last_attempt = self
            .session
            .quiz_history
            .iter()
            .rev()
            .find(|attempt| attempt.topic == topic);

        study::generate_quiz(
            &self.provider,
            topic,
            &results,
            num_questions,
            difficulty,
            last_attempt,
        )
        .await
    }

    /// Record the outcome of a completed quiz.
    pub fn record_quiz_result(&mut self, topic: &str, score: usize, total: usize) {
        self.session.record_quiz(topic, score, total);
        self.autosave();
    }

    /// Generate flashcards on a topic and store them in the session.
    pub async fn flashcards(&mut self, topic: &str, num_cards: usize) -> Result<Vec<Flashcard>> {
        if !self.config.enable_flashcards {
            return Err(StudyError::Config("flashcards are disabled".to_string()));
        }
        let num_cards = num_cards.clamp(self.config.min_flashcards, self.config.max_flashcards);

        let results = self.retrieve(topic).await?;
        let cards =
            study::generate_flashcards(&self.provider, topic, &results, num_cards).await?;
        self.session.set_flashcards(cards.clone());
        self.autosave();
        Ok(cards)
    }

    /// Explore a concept from the indexed material.
    pub async fn explore(&mut self, topic: &str) -> Result<ConceptMap> {
        if !self.config.enable_concept_explorer {
            return Err(StudyError::Config(
                "concept explorer is disabled".to_string(),
            ));
        }
        let results = self.retrieve(topic).await?;
        study::generate_concept_map(&self.provider, topic, &results).await
    }

    /// Plain keyword lookup over indexed chunks.
    pub fn keyword_search(&self, keyword: &str) -> Vec<&Chunk> {
        self.store.keyword_search(keyword)
    }

    /// Semantic retrieval narrowed to chunks containing the keyword.
    pub async fn hybrid_search(
        &self,
        query: &str,
        keyword: &str,
    ) -> Result<Vec<RetrievalResult>> {
        retriever::hybrid_retrieve(
            &self.provider,
            &self.store,
            query,
            Some(keyword),
            self.config.top_k_retrieval,
            self.config.similarity_threshold,
        )
        .await
    }

    /// All indexed chunks starting on the given 1-based page.
    pub fn page_chunks(&self, page_number: usize) -> Vec<&Chunk> {
        self.store.chunks_for_page(page_number)
    }

    /// Reset session state and drop the on-disk snapshot.
    pub fn reset(&mut self) -> Result<()> {
        self.session.reset();
        VectorStore::clear_snapshot(&self.config.vector_store_file)?;
        self.store = VectorStore::new();
        self.active_document = None;
        Ok(())
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        retriever::retrieve(
            &self.provider,
            &self.store,
            query,
            self.config.top_k_retrieval,
            self.config.similarity_threshold,
        )
        .await
    }

    fn autosave(&self) {
        if !self.config.save_session_data {
            return;
        }
        if let Err(e) = self.session.save(&self.config.session_file) {
            warn!("Could not save session state: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedding;
    use crate::study::UNSUPPORTED_ANSWER;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Word-presence embedder plus canned text generation, standing in
    /// for the hosted API.
    struct FakeProvider {
        vocabulary: Vec<&'static str>,
        reply: String,
        embed_calls: AtomicUsize,
        fail_generation: bool,
    }

    impl FakeProvider {
        fn new(vocabulary: Vec<&'static str>, reply: &str) -> Self {
            FakeProvider {
                vocabulary,
                reply: reply.to_string(),
                embed_calls: AtomicUsize::new(0),
                fail_generation: false,
            }
        }
    }

    impl Embedder for FakeProvider {
        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            let mut values = vec![0.0; self.vocabulary.len()];
            for (i, word) in self.vocabulary.iter().enumerate() {
                if text.to_lowercase().contains(word) {
                    values[i] = 1.0;
                }
            }
            Ok(Embedding::new(values))
        }
    }

    impl LanguageModel for FakeProvider {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            if self.fail_generation {
                return Err(StudyError::Generation("simulated outage".to_string()));
            }
            Ok(self.reply.clone())
        }
    }

    fn write_document(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path
    }

    fn config_in(dir: &tempfile::TempDir) -> Config {
        Config {
            vector_store_file: dir.path().join("store.json"),
            session_file: dir.path().join("session.json"),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn upload_then_ask_records_history_with_citations() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new(vec!["mitosis"], "Mitosis splits cells [notes.txt:page1]");
        let mut engine = StudyEngine::new(provider, config_in(&dir));

        let path = write_document(&dir, "notes.txt", "mitosis splits one cell into two");
        let indexed = engine.process_document(&path).await.unwrap();
        assert_eq!(indexed, 1);
        assert_eq!(engine.active_document(), Some("notes.txt"));

        let answer = engine
            .ask("tell me about mitosis", Difficulty::College, ExplanationType::Explanation)
            .await
            .unwrap();
        assert!(answer.contains("Mitosis"));
        assert_eq!(engine.session.chat_history.len(), 1);
        assert_eq!(
            engine.session.chat_history[0].citations,
            vec!["[notes.txt:page1]".to_string()]
        );
    }

    #[tokio::test]
    async fn unrelated_question_gets_the_unsupported_answer() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new(vec!["mitosis", "geology"], "should not be used");
        let mut engine = StudyEngine::new(provider, config_in(&dir));

        let path = write_document(&dir, "notes.txt", "mitosis splits one cell into two");
        engine.process_document(&path).await.unwrap();

        let answer = engine
            .ask("geology", Difficulty::College, ExplanationType::Explanation)
            .await
            .unwrap();
        assert_eq!(answer, UNSUPPORTED_ANSWER);
    }

    #[tokio::test]
    async fn unchanged_document_reuses_cached_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let path = write_document(&dir, "notes.txt", "osmosis moves water across membranes");

        let provider = FakeProvider::new(vec!["osmosis"], "reply");
        let mut engine = StudyEngine::new(provider, config.clone());
        engine.process_document(&path).await.unwrap();
        let calls_after_build = engine.provider.embed_calls.load(Ordering::SeqCst);
        assert!(calls_after_build > 0);

        let provider = FakeProvider::new(vec!["osmosis"], "reply");
        let mut engine = StudyEngine::new(provider, config);
        let indexed = engine.process_document(&path).await.unwrap();
        assert_eq!(indexed, 1);
        assert_eq!(engine.provider.embed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_rebuilt_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let snapshot_path = config.vector_store_file.clone();
        fs::write(&snapshot_path, b"{ not json").unwrap();

        let provider = FakeProvider::new(vec!["osmosis"], "reply");
        let mut engine = StudyEngine::new(provider, config);
        let path = write_document(&dir, "notes.txt", "osmosis moves water across membranes");

        let indexed = engine.process_document(&path).await.unwrap();
        assert_eq!(indexed, 1);
        // The rebuild replaced the bad snapshot with a readable one.
        assert!(VectorStore::load(&snapshot_path).unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_generation_leaves_history_intact() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = FakeProvider::new(vec!["mitosis"], "first answer");
        provider.fail_generation = false;
        let mut engine = StudyEngine::new(provider, config_in(&dir));

        let path = write_document(&dir, "notes.txt", "mitosis splits one cell into two");
        engine.process_document(&path).await.unwrap();
        engine
            .ask("mitosis", Difficulty::College, ExplanationType::Explanation)
            .await
            .unwrap();
        assert_eq!(engine.session.chat_history.len(), 1);

        engine.provider.fail_generation = true;
        let err = engine
            .ask("mitosis", Difficulty::College, ExplanationType::Explanation)
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::Generation(_)));
        assert_eq!(engine.session.chat_history.len(), 1);
    }

    #[tokio::test]
    async fn disabled_quiz_mode_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            enable_quiz_mode: false,
            ..config_in(&dir)
        };
        let mut engine = StudyEngine::new(FakeProvider::new(vec![], "reply"), config);
        let err = engine.quiz("cells", 5, QuizDifficulty::Mixed).await.unwrap_err();
        assert!(matches!(err, StudyError::Config(_)));
    }

    #[tokio::test]
    async fn quiz_result_updates_session_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StudyEngine::new(FakeProvider::new(vec![], "reply"), config_in(&dir));
        engine.record_quiz_result("cells", 4, 5);
        assert_eq!(engine.session.quiz_history.len(), 1);
        assert_eq!(engine.session.quiz_history[0].topic, "cells");
    }

    #[tokio::test]
    async fn keyword_search_reaches_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new(vec!["krebs"], "reply");
        let mut engine = StudyEngine::new(provider, config_in(&dir));

        let path = write_document(&dir, "notes.txt", "the krebs cycle produces energy carriers");
        engine.process_document(&path).await.unwrap();

        assert_eq!(engine.keyword_search("Krebs").len(), 1);
        assert!(engine.keyword_search("calvin").is_empty());
    }

    #[tokio::test]
    async fn hybrid_search_narrows_by_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            max_chunk_tokens: 5,
            overlap_tokens: 0,
            ..config_in(&dir)
        };
        let provider = FakeProvider::new(vec!["cell"], "reply");
        let mut engine = StudyEngine::new(provider, config);

        let path = write_document(
            &dir,
            "notes.txt",
            "cell wall rigid cell wall cell membrane flexible cell membrane",
        );
        assert_eq!(engine.process_document(&path).await.unwrap(), 2);

        let results = engine.hybrid_search("cell", "membrane").await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk.text.contains("membrane"));
    }

    #[tokio::test]
    async fn page_lookup_reaches_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::new(vec!["osmosis"], "reply");
        let mut engine = StudyEngine::new(provider, config_in(&dir));

        let path = write_document(&dir, "notes.txt", "osmosis moves water");
        engine.process_document(&path).await.unwrap();

        assert_eq!(engine.page_chunks(1).len(), 1);
        assert!(engine.page_chunks(2).is_empty());
    }

    #[tokio::test]
    async fn reset_clears_session_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let snapshot_path = config.vector_store_file.clone();
        let provider = FakeProvider::new(vec!["osmosis"], "reply");
        let mut engine = StudyEngine::new(provider, config);

        let path = write_document(&dir, "notes.txt", "osmosis moves water");
        engine.process_document(&path).await.unwrap();
        engine.record_quiz_result("osmosis", 5, 5);
        assert!(snapshot_path.exists());

        engine.reset().unwrap();
        assert!(!snapshot_path.exists());
        assert!(engine.session.quiz_history.is_empty());
        assert_eq!(engine.indexed_chunks(), 0);
        assert!(engine.active_document().is_none());
    }
}
