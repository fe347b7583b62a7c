//! In-process vector collection used for `memory://` URLs and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use memory_primitives::{cosine_similarity, EmbeddingVector, MemoryError, MemoryType, StoreResult};
use tokio::sync::RwLock;

use super::collection::{ScoredObject, VectorCollection, VectorObject};

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

#[derive(Debug, Default)]
struct Collection {
    properties: Vec<String>,
    objects: BTreeMap<String, VectorObject>,
}

impl Collection {
    fn filtered(&self, memory_type: Option<MemoryType>) -> impl Iterator<Item = &VectorObject> {
        self.objects
            .values()
            .filter(move |object| memory_type.is_none_or(|kind| kind == object.memory_type))
    }
}

/// Vector collection held in process memory, scored with cosine similarity
/// and BM25.
#[derive(Debug, Default)]
pub struct LocalVectorCollection {
    classes: RwLock<HashMap<String, Collection>>,
    offline: AtomicBool,
}

impl LocalVectorCollection {
    /// Creates an empty service with no collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command fail as if the service were unreachable.
    pub fn simulate_outage(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Properties declared by `class`, if it exists.
    pub async fn properties(&self, class: &str) -> Option<Vec<String>> {
        self.classes
            .read()
            .await
            .get(class)
            .map(|collection| collection.properties.clone())
    }

    fn check(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::Acquire) {
            Err(MemoryError::unavailable("vector service unreachable"))
        } else {
            Ok(())
        }
    }
}

fn missing(class: &str) -> MemoryError {
    MemoryError::backend(format!("collection `{class}` does not exist"))
}

fn sort_by_score(hits: &mut [ScoredObject]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Okapi BM25 over the documents' `content`.
#[allow(clippy::cast_precision_loss)]
fn bm25_scores<'a>(documents: &[&'a VectorObject], query: &str) -> Vec<(&'a VectorObject, f32)> {
    let terms = tokenize(query);
    if terms.is_empty() || documents.is_empty() {
        return Vec::new();
    }
    let tokenized: Vec<Vec<String>> = documents
        .iter()
        .map(|object| tokenize(&object.content))
        .collect();
    let doc_count = documents.len() as f32;
    let average_len = tokenized.iter().map(Vec::len).sum::<usize>() as f32 / doc_count;

    let idf: Vec<f32> = terms
        .iter()
        .map(|term| {
            let frequency = tokenized
                .iter()
                .filter(|tokens| tokens.contains(term))
                .count() as f32;
            (1.0 + (doc_count - frequency + 0.5) / (frequency + 0.5)).ln()
        })
        .collect();

    documents
        .iter()
        .zip(&tokenized)
        .filter_map(|(object, tokens)| {
            let length_norm = if average_len > 0.0 {
                1.0 - BM25_B + BM25_B * tokens.len() as f32 / average_len
            } else {
                1.0
            };
            let score: f32 = terms
                .iter()
                .zip(&idf)
                .map(|(term, idf)| {
                    let tf = tokens.iter().filter(|token| *token == term).count() as f32;
                    idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * length_norm)
                })
                .sum();
            (score > 0.0).then_some((*object, score))
        })
        .collect()
}

#[async_trait]
impl VectorCollection for LocalVectorCollection {
    async fn ready(&self) -> StoreResult<()> {
        self.check()
    }

    async fn has_schema(&self, class: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.classes.read().await.contains_key(class))
    }

    async fn create_schema(&self, class: &str, properties: &[&str]) -> StoreResult<()> {
        self.check()?;
        let mut classes = self.classes.write().await;
        if classes.contains_key(class) {
            return Err(MemoryError::backend(format!("collection `{class}` already exists")));
        }
        classes.insert(
            class.to_owned(),
            Collection {
                properties: properties.iter().map(|p| (*p).to_owned()).collect(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_schema(&self, class: &str) -> StoreResult<()> {
        self.check()?;
        self.classes.write().await.remove(class);
        Ok(())
    }

    async fn upsert(&self, class: &str, object: VectorObject) -> StoreResult<()> {
        self.check()?;
        let mut classes = self.classes.write().await;
        let collection = classes.get_mut(class).ok_or_else(|| missing(class))?;
        collection.objects.insert(object.id.clone(), object);
        Ok(())
    }

    async fn get(&self, class: &str, id: &str) -> StoreResult<Option<VectorObject>> {
        self.check()?;
        let classes = self.classes.read().await;
        let collection = classes.get(class).ok_or_else(|| missing(class))?;
        Ok(collection.objects.get(id).cloned())
    }

    async fn delete(&self, class: &str, id: &str) -> StoreResult<bool> {
        self.check()?;
        let mut classes = self.classes.write().await;
        let collection = classes.get_mut(class).ok_or_else(|| missing(class))?;
        Ok(collection.objects.remove(id).is_some())
    }

    async fn delete_where_type(&self, class: &str, memory_type: MemoryType) -> StoreResult<usize> {
        self.check()?;
        let mut classes = self.classes.write().await;
        let collection = classes.get_mut(class).ok_or_else(|| missing(class))?;
        let before = collection.objects.len();
        collection
            .objects
            .retain(|_, object| object.memory_type != memory_type);
        Ok(before - collection.objects.len())
    }

    async fn near_vector(
        &self,
        class: &str,
        vector: &EmbeddingVector,
        limit: usize,
        memory_type: Option<MemoryType>,
    ) -> StoreResult<Vec<ScoredObject>> {
        self.check()?;
        let classes = self.classes.read().await;
        let collection = classes.get(class).ok_or_else(|| missing(class))?;

        let mut hits: Vec<ScoredObject> = collection
            .filtered(memory_type)
            .filter_map(|object| {
                let candidate = object.vector.as_ref()?;
                if candidate.len() != vector.len() {
                    return None;
                }
                Some(ScoredObject {
                    object: object.clone(),
                    score: cosine_similarity(candidate, vector),
                })
            })
            .collect();
        sort_by_score(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn bm25(
        &self,
        class: &str,
        query: &str,
        limit: usize,
        memory_type: Option<MemoryType>,
    ) -> StoreResult<Vec<ScoredObject>> {
        self.check()?;
        let classes = self.classes.read().await;
        let collection = classes.get(class).ok_or_else(|| missing(class))?;

        let documents: Vec<&VectorObject> = collection.filtered(memory_type).collect();
        let mut hits: Vec<ScoredObject> = bm25_scores(&documents, query)
            .into_iter()
            .map(|(object, score)| ScoredObject {
                object: object.clone(),
                score,
            })
            .collect();
        sort_by_score(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list(&self, class: &str, memory_type: Option<MemoryType>) -> StoreResult<Vec<VectorObject>> {
        self.check()?;
        let classes = self.classes.read().await;
        let collection = classes.get(class).ok_or_else(|| missing(class))?;
        Ok(collection.filtered(memory_type).cloned().collect())
    }

    async fn count(&self, class: &str, memory_type: Option<MemoryType>) -> StoreResult<usize> {
        self.check()?;
        let classes = self.classes.read().await;
        let collection = classes.get(class).ok_or_else(|| missing(class))?;
        Ok(collection.filtered(memory_type).count())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn object(id: &str, content: &str, vector: Option<Vec<f32>>) -> VectorObject {
        VectorObject {
            id: id.into(),
            content: content.into(),
            memory_type: MemoryType::LongTerm,
            timestamp: Utc::now(),
            metadata: "{}".into(),
            tags: Vec::new(),
            priority: 0,
            vector: vector.map(|values| EmbeddingVector::new(values).unwrap()),
        }
    }

    #[tokio::test]
    async fn near_vector_orders_by_similarity() {
        let service = LocalVectorCollection::new();
        service.create_schema("Memory", &["content"]).await.unwrap();
        service
            .upsert("Memory", object("x", "x", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        service
            .upsert("Memory", object("y", "y", Some(vec![0.6, 0.8])))
            .await
            .unwrap();
        service.upsert("Memory", object("z", "text only", None)).await.unwrap();

        let query = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        let hits = service.near_vector("Memory", &query, 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|hit| hit.object.id.as_str()).collect();
        assert_eq!(ids, ["x", "y"]);
        assert!((hits[1].score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn bm25_prefers_rarer_terms() {
        let service = LocalVectorCollection::new();
        service.create_schema("Memory", &["content"]).await.unwrap();
        for (id, content) in [
            ("a", "the cat sat on the mat"),
            ("b", "the dog chased the cat"),
            ("c", "the bird sang"),
        ] {
            service.upsert("Memory", object(id, content, None)).await.unwrap();
        }

        let hits = service.bm25("Memory", "dog", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object.id, "b");

        let hits = service.bm25("Memory", "Cat dog", 10, None).await.unwrap();
        assert_eq!(hits[0].object.id, "b");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn commands_on_missing_collection_fail() {
        let service = LocalVectorCollection::new();
        assert!(service.upsert("Nope", object("a", "a", None)).await.is_err());
        assert!(!service.has_schema("Nope").await.unwrap());

        service.create_schema("Memory", &["content"]).await.unwrap();
        assert!(service.create_schema("Memory", &["content"]).await.is_err());
        assert_eq!(
            service.properties("Memory").await.unwrap(),
            vec!["content".to_owned()]
        );
    }
}
