use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::path::Path;
use std::sync::Arc;

use super::ScoredPassage;
use crate::types::{RetrievedPassage, Subject};

/// LanceDB store with one table per subject namespace.
pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
}

impl LanceStore {
    pub async fn connect(path: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let uri = path.to_str().unwrap_or("./lance_data");
        let db = lancedb::connect(uri)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    pub fn table_name(subject: Subject) -> String {
        format!("passages_{}", subject.as_str())
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("subtopic", DataType::Utf8, false),
            Field::new("unit_number", DataType::UInt32, false),
            Field::new("source_file", DataType::Utf8, false),
            Field::new("page_start", DataType::UInt32, false),
            Field::new("page_end", DataType::UInt32, false),
            Field::new("content_type", DataType::Utf8, false),
            Field::new("image_url", DataType::Utf8, true),
            Field::new("latex", DataType::Utf8, true),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
        ]))
    }

    /// Create the subject's table if missing. Losing a creation race to
    /// another caller counts as success.
    pub async fn ensure_subject_table(&self, subject: Subject) -> Result<()> {
        let name = Self::table_name(subject);
        let names = self.db.table_names().execute().await?;
        if names.contains(&name) {
            tracing::debug!(table = %name, "Table already exists");
            return Ok(());
        }

        match self.db.create_empty_table(&name, self.schema()).execute().await {
            Ok(_) => {
                tracing::info!(table = %name, dimension = self.dimension, "Created subject table");
                Ok(())
            }
            Err(lancedb::Error::TableAlreadyExists { .. }) => {
                tracing::debug!(table = %name, "Table created concurrently");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create table {}", name)),
        }
    }

    pub async fn ensure_all_tables(&self) -> Result<()> {
        for subject in Subject::ALL {
            self.ensure_subject_table(subject).await?;
        }
        Ok(())
    }

    /// Append pre-embedded passages to a subject table.
    pub async fn add_passages(
        &self,
        subject: Subject,
        passages: Vec<(RetrievedPassage, Vec<f32>)>,
    ) -> Result<()> {
        if passages.is_empty() {
            return Ok(());
        }
        if let Some((_, bad)) = passages.iter().find(|(_, v)| v.len() != self.dimension) {
            anyhow::bail!(
                "passage vector has dimension {}, table expects {}",
                bad.len(),
                self.dimension
            );
        }

        self.ensure_subject_table(subject).await?;
        let table = self
            .db
            .open_table(Self::table_name(subject))
            .execute()
            .await
            .context("Failed to open subject table")?;

        let len = passages.len();
        let schema = self.schema();

        let ids: Vec<String> = (0..len).map(|_| uuid::Uuid::new_v4().to_string()).collect();
        let contents: Vec<&str> = passages.iter().map(|(p, _)| p.content.as_str()).collect();
        let subtopics: Vec<&str> = passages.iter().map(|(p, _)| p.subtopic.as_str()).collect();
        let units: Vec<u32> = passages.iter().map(|(p, _)| p.unit_number).collect();
        let files: Vec<&str> = passages.iter().map(|(p, _)| p.source_file.as_str()).collect();
        let starts: Vec<u32> = passages.iter().map(|(p, _)| p.page_start).collect();
        let ends: Vec<u32> = passages.iter().map(|(p, _)| p.page_end).collect();
        let types: Vec<&str> = passages.iter().map(|(p, _)| p.content_type.as_str()).collect();
        let images: Vec<Option<&str>> = passages.iter().map(|(p, _)| p.image_url.as_deref()).collect();
        let latex: Vec<Option<&str>> = passages.iter().map(|(p, _)| p.latex.as_deref()).collect();

        let flat_vectors: Vec<f32> = passages.iter().flat_map(|(_, v)| v.iter().copied()).collect();
        let values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(subtopics)),
                Arc::new(UInt32Array::from(units)),
                Arc::new(StringArray::from(files)),
                Arc::new(UInt32Array::from(starts)),
                Arc::new(UInt32Array::from(ends)),
                Arc::new(StringArray::from(types)),
                Arc::new(StringArray::from(images)),
                Arc::new(StringArray::from(latex)),
                Arc::new(vector_array) as Arc<dyn Array>,
            ],
        )
        .context("Failed to create RecordBatch")?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to insert passages")?;

        tracing::debug!(subject = %subject, count = len, "Inserted passages into LanceDB");
        Ok(())
    }

    /// Cosine nearest-neighbour search within one subject namespace.
    pub async fn vector_search(
        &self,
        subject: Subject,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        anyhow::ensure!(
            query.len() == self.dimension,
            "query vector has dimension {}, index expects {}",
            query.len(),
            self.dimension
        );

        let table = self
            .db
            .open_table(Self::table_name(subject))
            .execute()
            .await
            .with_context(|| format!("Failed to open table for {}", subject))?;

        let results = table
            .query()
            .nearest_to(query)?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("LanceDB vector search failed")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        let mut hits = extract_passages_from_batches(&batches);
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    pub async fn count(&self, subject: Subject) -> Result<usize> {
        let table = self.db.open_table(Self::table_name(subject)).execute().await?;
        let count = table.count_rows(None).await?;
        Ok(count)
    }
}

/// Extract scored passages (with their stored vectors) from Arrow RecordBatches.
fn extract_passages_from_batches(batches: &[RecordBatch]) -> Vec<ScoredPassage> {
    let mut hits = Vec::new();
    for batch in batches {
        let strings = move |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        };
        let uints = move |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
        };

        let contents = strings("content");
        let subtopics = strings("subtopic");
        let files = strings("source_file");
        let types = strings("content_type");
        let images = strings("image_url");
        let latex = strings("latex");
        let units = uints("unit_number");
        let starts = uints("page_start");
        let ends = uints("page_end");
        let vectors = batch
            .column_by_name("vector")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(contents), Some(subtopics)) = (contents, subtopics) else {
            continue;
        };

        let optional = |col: Option<&StringArray>, i: usize| {
            col.filter(|c| !c.is_null(i))
                .map(|c| c.value(i).to_string())
                .filter(|s| !s.is_empty())
        };

        for i in 0..batch.num_rows() {
            let score = distances.map(|d| (1.0 - d.value(i)).max(0.0)).unwrap_or(0.0);
            let vector = vectors
                .map(|list| list.value(i))
                .and_then(|values| {
                    values
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|f| f.values().to_vec())
                })
                .unwrap_or_default();

            hits.push(ScoredPassage {
                passage: RetrievedPassage {
                    content: contents.value(i).to_string(),
                    subtopic: subtopics.value(i).to_string(),
                    unit_number: units.map(|c| c.value(i)).unwrap_or(0),
                    source_file: files.map(|c| c.value(i).to_string()).unwrap_or_default(),
                    page_start: starts.map(|c| c.value(i)).unwrap_or(0),
                    page_end: ends.map(|c| c.value(i)).unwrap_or(0),
                    content_type: types.map(|c| c.value(i).to_string()).unwrap_or_default(),
                    image_url: optional(images, i),
                    latex: optional(latex, i),
                },
                score,
                vector,
            });
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(subtopic: &str, content: &str) -> RetrievedPassage {
        RetrievedPassage {
            content: content.to_string(),
            subtopic: subtopic.to_string(),
            unit_number: 3,
            source_file: "unit_03.pdf".to_string(),
            page_start: 12,
            page_end: 13,
            content_type: "text".to_string(),
            image_url: None,
            latex: Some("6CO_2 + 6H_2O".to_string()),
        }
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::connect(dir.path(), 3).await.unwrap();
        store.ensure_all_tables().await.unwrap();
        store.ensure_all_tables().await.unwrap();
        assert_eq!(store.count(Subject::Biology).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_table_creation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LanceStore::connect(dir.path(), 3).await.unwrap());
        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.ensure_subject_table(Subject::Physics).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.ensure_subject_table(Subject::Physics).await })
        };
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_search_is_namespaced_and_ranked() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::connect(dir.path(), 3).await.unwrap();
        store.ensure_all_tables().await.unwrap();

        store
            .add_passages(
                Subject::Biology,
                vec![
                    (passage("Photosynthesis", "Light reactions occur in thylakoids"), vec![1.0, 0.0, 0.0]),
                    (passage("Respiration", "Glycolysis happens in the cytosol"), vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        store
            .add_passages(
                Subject::Physics,
                vec![(passage("Electricity", "V = IR"), vec![1.0, 0.0, 0.0])],
            )
            .await
            .unwrap();

        let hits = store
            .vector_search(Subject::Biology, &[0.9, 0.1, 0.0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].passage.subtopic, "Photosynthesis");
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].vector.len(), 3);
        assert_eq!(hits[0].passage.latex.as_deref(), Some("6CO_2 + 6H_2O"));
        assert!(hits[0].passage.image_url.is_none());
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::connect(dir.path(), 3).await.unwrap();
        store.ensure_all_tables().await.unwrap();
        assert!(store.vector_search(Subject::Chemistry, &[1.0], 5).await.is_err());
        assert!(store
            .add_passages(Subject::Chemistry, vec![(passage("Bonding", "x"), vec![1.0])])
            .await
            .is_err());
    }
}
