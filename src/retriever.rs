use log::{debug, info};

use crate::chunking::Chunk;
use crate::embeddings::Embedder;
use crate::error::{Result, StudyError};
use crate::store::VectorStore;

/// A scored chunk produced for one query. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Embed every chunk and build the vector store.
///
/// Chunks are embedded in document order. If any embedding call fails the
/// build aborts with the number of chunks indexed so far versus the total.
pub async fn build_index<E: Embedder>(embedder: &E, chunks: Vec<Chunk>) -> Result<VectorStore> {
    let total = chunks.len();
    let mut store = VectorStore::new();

    for (indexed, chunk) in chunks.into_iter().enumerate() {
        debug!("Embedding chunk {}/{}: {}", indexed + 1, total, chunk.id);
        let embedding = embedder
            .embed(&chunk.text)
            .await
            .map_err(|e| StudyError::IndexBuild {
                indexed,
                total,
                source: Box::new(e),
            })?;
        store
            .insert(chunk, embedding)
            .map_err(|e| StudyError::IndexBuild {
                indexed,
                total,
                source: Box::new(e),
            })?;
    }

    info!("Indexed {total} chunks");
    Ok(store)
}

/// Retrieve the top-k chunks whose similarity clears the threshold.
///
/// Returns only qualifying results, never padded to `top_k`. An empty
/// store yields an empty list without calling the embedder. The query is
/// embedded with the same model as indexing; a dimension mismatch is a
/// fatal index error rather than a silent downgrade.
pub async fn retrieve<E: Embedder>(
    embedder: &E,
    store: &VectorStore,
    query: &str,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<RetrievalResult>> {
    if store.is_empty() {
        return Ok(Vec::new());
    }

    let query_embedding = embedder.embed(query).await?;
    let hits = store.search(&query_embedding, top_k)?;

    let results: Vec<RetrievalResult> = hits
        .into_iter()
        .filter(|(_, similarity)| *similarity >= threshold)
        .map(|(chunk, similarity)| RetrievalResult {
            chunk: chunk.clone(),
            similarity,
        })
        .collect();

    debug!(
        "Retrieved {} chunks above threshold {threshold} for query: {}",
        results.len(),
        query.chars().take(50).collect::<String>()
    );
    Ok(results)
}

/// Semantic retrieval narrowed by a keyword filter.
///
/// Searches twice as deep as `top_k`, drops results that do not contain
/// the keyword, and truncates to `top_k`.
pub async fn hybrid_retrieve<E: Embedder>(
    embedder: &E,
    store: &VectorStore,
    query: &str,
    keyword: Option<&str>,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<RetrievalResult>> {
    let mut results = retrieve(embedder, store, query, top_k * 2, threshold).await?;

    if let Some(keyword) = keyword {
        let needle = keyword.to_lowercase();
        results.retain(|result| result.chunk.text.to_lowercase().contains(&needle));
    }

    results.truncate(top_k);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::embeddings::Embedding;
    use crate::error::StudyError;

    /// Maps each known word to a fixed axis-aligned vector, so similarity
    /// between a query word and a chunk containing it is exactly 1.0.
    struct WordEmbedder {
        vocabulary: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl WordEmbedder {
        fn new(vocabulary: Vec<&'static str>) -> Self {
            WordEmbedder {
                vocabulary,
                fail_on: None,
            }
        }
    }

    impl Embedder for WordEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding> {
            if let Some(needle) = self.fail_on {
                if text.contains(needle) {
                    return Err(StudyError::Embedding("simulated API failure".to_string()));
                }
            }
            let mut values = vec![0.0; self.vocabulary.len()];
            for (i, word) in self.vocabulary.iter().enumerate() {
                if text.contains(word) {
                    values[i] = 1.0;
                }
            }
            Ok(Embedding::new(values))
        }
    }

    fn document(text: &str) -> Document {
        Document {
            document_id: "bio.txt".to_string(),
            mime_type: "text/plain".to_string(),
            pages: vec![text.to_string()],
        }
    }

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: format!("bio.txt#{i}"),
                text: text.to_string(),
                source_document: "bio.txt".to_string(),
                page_number: 1,
                token_count: crate::chunking::count_tokens(text),
                order_index: i,
            })
            .collect()
    }

    #[tokio::test]
    async fn retrieval_filters_by_threshold() {
        let embedder = WordEmbedder::new(vec!["mitosis", "meiosis", "osmosis"]);
        let store = build_index(
            &embedder,
            chunks(&["mitosis divides cells", "meiosis halves them", "osmosis moves water"]),
        )
        .await
        .unwrap();

        let results = retrieve(&embedder, &store, "mitosis", 5, 0.9).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.order_index, 0);
        assert!(results.iter().all(|r| r.similarity >= 0.9));
    }

    #[tokio::test]
    async fn fewer_than_top_k_results_are_not_padded() {
        let embedder = WordEmbedder::new(vec!["mitosis", "meiosis"]);
        let store = build_index(&embedder, chunks(&["mitosis", "meiosis"]))
            .await
            .unwrap();

        let results = retrieve(&embedder, &store, "mitosis", 5, 0.5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_store_retrieves_nothing() {
        let embedder = WordEmbedder::new(vec!["anything"]);
        let store = VectorStore::new();
        let results = retrieve(&embedder, &store, "anything", 5, 0.0).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn all_scores_below_threshold_yield_empty_context() {
        let embedder = WordEmbedder::new(vec!["mitosis", "geology"]);
        let store = build_index(&embedder, chunks(&["mitosis divides cells"]))
            .await
            .unwrap();

        let results = retrieve(&embedder, &store, "geology", 5, 0.5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn failed_embedding_aborts_build_with_progress() {
        let embedder = WordEmbedder {
            vocabulary: vec!["a", "b"],
            fail_on: Some("third"),
        };
        let err = build_index(&embedder, chunks(&["first", "second", "third chunk"]))
            .await
            .unwrap_err();

        match err {
            StudyError::IndexBuild { indexed, total, .. } => {
                assert_eq!(indexed, 2);
                assert_eq!(total, 3);
            }
            other => panic!("expected IndexBuild, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hybrid_retrieval_applies_the_keyword_filter() {
        let embedder = WordEmbedder::new(vec!["cell"]);
        let store = build_index(
            &embedder,
            chunks(&["cell walls are rigid", "cell membranes are flexible"]),
        )
        .await
        .unwrap();

        let results = hybrid_retrieve(&embedder, &store, "cell", Some("membrane"), 5, 0.5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk.text.contains("membranes"));

        let none = hybrid_retrieve(&embedder, &store, "cell", Some("nucleus"), 5, 0.5)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn deterministic_ordering_for_a_fixed_query() {
        let embedder = WordEmbedder::new(vec!["cell", "wall"]);
        let store = build_index(
            &embedder,
            chunks(&["cell wall", "cell membrane", "cell nucleus"]),
        )
        .await
        .unwrap();

        let first = retrieve(&embedder, &store, "cell wall", 3, 0.0).await.unwrap();
        let second = retrieve(&embedder, &store, "cell wall", 3, 0.0).await.unwrap();
        let ids = |rs: &[RetrievalResult]| rs.iter().map(|r| r.chunk.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        // Equal-scoring "cell membrane" / "cell nucleus" keep document order.
        assert_eq!(first[0].chunk.order_index, 0);
        assert_eq!(first[1].chunk.order_index, 1);
        assert_eq!(first[2].chunk.order_index, 2);
    }

    #[tokio::test]
    async fn page_metadata_survives_the_pipeline() {
        let embedder = WordEmbedder::new(vec!["alpha"]);
        let doc = document("alpha beta gamma");
        let built = crate::chunking::chunk_document(&doc, 400, 50).unwrap();
        let store = build_index(&embedder, built).await.unwrap();

        let results = retrieve(&embedder, &store, "alpha", 1, 0.1).await.unwrap();
        assert_eq!(results[0].chunk.page_number, 1);
        assert_eq!(results[0].chunk.citation(), "[bio.txt:page1]");
    }
}
