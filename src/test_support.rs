#![cfg(test)]
//! In-memory `VectorStore` fake shared by unit tests across modules. Not
//! part of the public API; only compiled under `cfg(test)`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::vector_store::{Filter, Point, ScrollPage, SearchHit, VectorStore};

#[derive(Default)]
pub struct FakeVectorStore {
    collections: Mutex<HashSet<String>>,
    points: Mutex<HashMap<String, Vec<Point>>>,
    indexes: Mutex<HashMap<String, HashSet<String>>>,
}

fn matches_filter(point: &Point, filter: &Filter) -> bool {
    for (field, value) in &filter.must_eq {
        match point.payload.get(field) {
            Some(v) if v == value => {}
            _ => return false,
        }
    }
    for (field, value) in &filter.must_not_contain {
        if let Some(arr) = point.payload.get(field).and_then(|v| v.as_array()) {
            if arr.contains(value) {
                return false;
            }
        }
    }
    true
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.lock().unwrap().contains(name))
    }

    async fn create_collection(&self, name: &str, _dim: usize, _max_segment_size_kb: u64) -> Result<()> {
        self.collections.lock().unwrap().insert(name.to_string());
        self.points.lock().unwrap().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.lock().unwrap().remove(name);
        self.points.lock().unwrap().remove(name);
        self.indexes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn upsert_points(&self, name: &str, new_points: &[Point], _wait: bool) -> Result<()> {
        let mut points = self.points.lock().unwrap();
        let entry = points.entry(name.to_string()).or_default();
        for p in new_points {
            entry.retain(|existing| existing.id != p.id);
            entry.push(p.clone());
        }
        Ok(())
    }

    async fn delete_by_filter(&self, name: &str, filter: &Filter) -> Result<()> {
        let mut points = self.points.lock().unwrap();
        if let Some(entry) = points.get_mut(name) {
            entry.retain(|p| !matches_filter(p, filter));
        }
        Ok(())
    }

    async fn scroll(&self, name: &str, filter: &Filter, limit: usize, cursor: Option<Value>) -> Result<ScrollPage> {
        let points = self.points.lock().unwrap();
        let all: Vec<Point> = points.get(name).cloned().unwrap_or_default().into_iter().filter(|p| matches_filter(p, filter)).collect();
        let start = cursor.and_then(|c| c.as_u64()).unwrap_or(0) as usize;
        let end = (start + limit).min(all.len());
        let page = all[start.min(all.len())..end].to_vec();
        let next_cursor = if end < all.len() { Some(Value::from(end as u64)) } else { None };
        Ok(ScrollPage { points: page, next_cursor })
    }

    async fn search(&self, name: &str, _vector: &[f32], filter: &Filter, limit: usize, _score_threshold: Option<f32>) -> Result<Vec<SearchHit>> {
        let points = self.points.lock().unwrap();
        let all: Vec<Point> = points.get(name).cloned().unwrap_or_default().into_iter().filter(|p| matches_filter(p, filter)).collect();
        Ok(all.into_iter().take(limit).map(|p| SearchHit { id: p.id, score: 1.0, payload: p.payload }).collect())
    }

    async fn set_payload(&self, name: &str, point_ids: &[Uuid], payload: Value) -> Result<()> {
        let mut points = self.points.lock().unwrap();
        if let Some(entry) = points.get_mut(name) {
            for p in entry.iter_mut() {
                if point_ids.contains(&p.id) {
                    if let (Some(obj), Some(extra)) = (p.payload.as_object_mut(), payload.as_object()) {
                        for (k, v) in extra {
                            obj.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn create_payload_index(&self, name: &str, field: &str, _schema: &str) -> Result<()> {
        self.indexes.lock().unwrap().entry(name.to_string()).or_default().insert(field.to_string());
        Ok(())
    }

    async fn delete_payload_index(&self, name: &str, field: &str) -> Result<()> {
        if let Some(set) = self.indexes.lock().unwrap().get_mut(name) {
            set.remove(field);
        }
        Ok(())
    }

    async fn list_payload_indexes(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.indexes.lock().unwrap().get(name).cloned().unwrap_or_default().into_iter().collect())
    }

    async fn count(&self, name: &str, filter: &Filter) -> Result<u64> {
        let points = self.points.lock().unwrap();
        Ok(points.get(name).cloned().unwrap_or_default().into_iter().filter(|p| matches_filter(p, filter)).count() as u64)
    }
}
