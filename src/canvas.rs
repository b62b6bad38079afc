//! Canvas replica: stroke data over a shared CRDT document.
//!
//! Each peer (and the relay, per room) owns one `CanvasDoc`. Strokes live
//! in a root `"strokes"` map keyed by stroke id, each value the JSON
//! encoding of the stroke. Concurrent edits to *different* strokes merge
//! cleanly; a stroke is only ever mutated by its author, so last-writer-
//! wins on a single key never loses foreign data.
//!
//! Local mutations return the full document state encoded as an update.
//! Exports are cumulative on purpose: the relay debounce-drops frames that
//! arrive too fast, and a cumulative frame means the next accepted one
//! carries everything a dropped one did — no causal gap, no lost points.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, MapRef, ReadTxn, StateVector, Transact, Update};

const STROKES_MAP_NAME: &str = "strokes";

/// A single drawn stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: Uuid,
    /// CSS-style color string, e.g. "#1a2b3c"
    pub color: String,
    pub width: f32,
    /// Canvas-space points in draw order
    pub points: Vec<[f32; 2]>,
}

/// Errors from replica operations.
#[derive(Debug, Clone)]
pub enum CanvasError {
    DecodeError(String),
    ApplyError(String),
    SerializationError(String),
    UnknownStroke(Uuid),
}

impl std::fmt::Display for CanvasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecodeError(e) => write!(f, "Failed to decode update: {e}"),
            Self::ApplyError(e) => write!(f, "Failed to apply update: {e}"),
            Self::SerializationError(e) => write!(f, "Failed to serialize stroke: {e}"),
            Self::UnknownStroke(id) => write!(f, "Unknown stroke: {id}"),
        }
    }
}

impl std::error::Error for CanvasError {}

/// A mergeable canvas document.
///
/// Wraps the CRDT handle behind the contract the rest of the crate
/// consumes: create empty, export snapshot, apply update, mutate-and-diff.
pub struct CanvasDoc {
    doc: Doc,
    strokes: MapRef,
}

impl CanvasDoc {
    /// Create an empty canvas.
    pub fn new() -> Self {
        let doc = Doc::new();
        let strokes = doc.get_or_insert_map(STROKES_MAP_NAME);
        Self { doc, strokes }
    }

    /// Start a new stroke at the given point.
    ///
    /// Returns the stroke id and the cumulative update to relay.
    pub fn begin_stroke(
        &self,
        color: &str,
        width: f32,
        x: f32,
        y: f32,
    ) -> Result<(Uuid, Vec<u8>), CanvasError> {
        let stroke = Stroke {
            id: Uuid::new_v4(),
            color: color.to_string(),
            width,
            points: vec![[x, y]],
        };
        let id = stroke.id;
        let diff = self.write_stroke(&stroke)?;
        Ok((id, diff))
    }

    /// Append a point to an existing stroke.
    ///
    /// Returns the cumulative update to relay. Called per pointer-move
    /// event, so peers see the stroke grow mid-drag; the relay-side
    /// debounce bounds the resulting message rate.
    pub fn extend_stroke(&self, stroke_id: Uuid, x: f32, y: f32) -> Result<Vec<u8>, CanvasError> {
        let mut stroke = self
            .stroke(stroke_id)
            .ok_or(CanvasError::UnknownStroke(stroke_id))?;
        stroke.points.push([x, y]);
        self.write_stroke(&stroke)
    }

    fn write_stroke(&self, stroke: &Stroke) -> Result<Vec<u8>, CanvasError> {
        let json = serde_json::to_string(stroke)
            .map_err(|e| CanvasError::SerializationError(e.to_string()))?;

        {
            let mut txn = self.doc.transact_mut();
            self.strokes.insert(&mut txn, stroke.id.to_string(), json);
        }

        // Full state, not a delta since the last export. A delta dropped
        // in transit would leave a permanent causal gap in every receiver;
        // merges are idempotent, so the redundancy is free.
        Ok(self.encode_snapshot())
    }

    /// Get a stroke by id.
    pub fn stroke(&self, stroke_id: Uuid) -> Option<Stroke> {
        let txn = self.doc.transact();
        self.strokes
            .get(&txn, &stroke_id.to_string())
            .and_then(|value| {
                let json = value.to_string(&txn);
                serde_json::from_str(&json).ok()
            })
    }

    /// All strokes on the canvas, in arbitrary order.
    pub fn strokes(&self) -> Vec<Stroke> {
        let txn = self.doc.transact();
        self.strokes
            .iter(&txn)
            .filter_map(|(_, value)| {
                let json = value.to_string(&txn);
                serde_json::from_str(&json).ok()
            })
            .collect()
    }

    /// Number of strokes on the canvas.
    pub fn stroke_count(&self) -> usize {
        let txn = self.doc.transact();
        self.strokes.len(&txn) as usize
    }

    /// Encode the current state vector for sync handshakes.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full document state as a snapshot.
    ///
    /// Applying this to an empty document reproduces the canvas.
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode only what a remote peer is missing, given its state vector.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, CanvasError> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| CanvasError::DecodeError(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Merge a remote update (diff or full snapshot) into this replica.
    ///
    /// Merging is idempotent and order-insensitive; a malformed payload
    /// fails here without touching document state.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), CanvasError> {
        let decoded =
            Update::decode_v1(update).map_err(|e| CanvasError::DecodeError(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| CanvasError::ApplyError(e.to_string()))
    }

    /// Discard all content, replacing the document with a fresh empty one.
    ///
    /// A hard reset, not a merge: all CRDT history is gone, so pre-clear
    /// strokes cannot resurface through later merges.
    pub fn clear(&mut self) {
        self.doc = Doc::new();
        self.strokes = self.doc.get_or_insert_map(STROKES_MAP_NAME);
    }

    /// The underlying CRDT handle.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }
}

impl Default for CanvasDoc {
    fn default() -> Self {
        Self::new()
    }
}
