//! Overlay undo/redo using compressed snapshots
//!
//! Each entry is a zstd-compressed JSON snapshot of a whole
//! `StagingOverlay`: draft, change log, staged sets and positions travel
//! together, so restoring one can never leave the log out of step with
//! the draft.

use std::collections::VecDeque;

use crate::constants::defaults;
use crate::error::{Result, StagingError};
use crate::overlay::StagingOverlay;

const COMPRESSION_LEVEL: i32 = 3;

/// Bounded undo/redo history for one target
pub struct UndoStack {
    snapshots: VecDeque<Vec<u8>>,
    current: usize,
    max_snapshots: usize,
}

impl UndoStack {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            current: 0,
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Record `overlay` as the newest state
    ///
    /// Drops any redo history past the current position.
    pub fn push(&mut self, overlay: &StagingOverlay) -> Result<()> {
        let json = serde_json::to_vec(overlay)?;
        let compressed = zstd::encode_all(&json[..], COMPRESSION_LEVEL)
            .map_err(|e| StagingError::Compression(e.to_string()))?;

        self.snapshots.truncate(self.current + 1);
        if self.snapshots.is_empty() {
            self.current = 0;
        }
        self.snapshots.push_back(compressed);
        self.current = self.snapshots.len() - 1;

        while self.snapshots.len() > self.max_snapshots {
            self.snapshots.pop_front();
            self.current = self.current.saturating_sub(1);
        }
        Ok(())
    }

    /// Step back one snapshot
    pub fn undo(&mut self) -> Option<Result<StagingOverlay>> {
        if !self.can_undo() {
            return None;
        }
        self.current -= 1;
        Some(self.decompress(self.current))
    }

    /// Step forward one snapshot
    pub fn redo(&mut self) -> Option<Result<StagingOverlay>> {
        if !self.can_redo() {
            return None;
        }
        self.current += 1;
        Some(self.decompress(self.current))
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = 0;
    }

    /// Total compressed size of all snapshots
    pub fn compressed_size(&self) -> usize {
        self.snapshots.iter().map(Vec::len).sum()
    }

    fn decompress(&self, index: usize) -> Result<StagingOverlay> {
        let compressed = self
            .snapshots
            .get(index)
            .ok_or_else(|| StagingError::Compression(format!("no snapshot at {}", index)))?;
        let json = zstd::decode_all(&compressed[..])
            .map_err(|e| StagingError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(defaults::UNDO_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, Pipeline};

    fn overlay_with(nodes: &[&str]) -> StagingOverlay {
        let mut overlay = StagingOverlay::enter("s1", Pipeline::new());
        for id in nodes {
            overlay.add_node(id, Node::new("audio::gain")).unwrap();
        }
        overlay
    }

    #[test]
    fn test_push_and_undo() {
        let mut stack = UndoStack::new(10);
        stack.push(&overlay_with(&[])).unwrap();
        stack.push(&overlay_with(&["a"])).unwrap();
        stack.push(&overlay_with(&["a", "b"])).unwrap();

        let undone = stack.undo().unwrap().unwrap();
        assert_eq!(undone.staged().nodes.len(), 1);
        assert_eq!(undone.change_log().len(), 1);

        let undone = stack.undo().unwrap().unwrap();
        assert!(undone.is_clean());
        assert!(stack.undo().is_none());
    }

    #[test]
    fn test_redo_truncated_by_push() {
        let mut stack = UndoStack::new(10);
        stack.push(&overlay_with(&[])).unwrap();
        stack.push(&overlay_with(&["a"])).unwrap();

        stack.undo().unwrap().unwrap();
        assert!(stack.can_redo());
        let redone = stack.redo().unwrap().unwrap();
        assert!(redone.staged().contains_node("a"));

        stack.undo().unwrap().unwrap();
        stack.push(&overlay_with(&["z"])).unwrap();
        assert!(!stack.can_redo());
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut stack = UndoStack::new(3);
        for n in 0..5 {
            let ids: Vec<String> = (0..n).map(|i| format!("n{}", i)).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            stack.push(&overlay_with(&refs)).unwrap();
        }
        assert_eq!(stack.len(), 3);
        assert!(stack.compressed_size() > 0);

        stack.undo().unwrap().unwrap();
        let oldest = stack.undo().unwrap().unwrap();
        assert_eq!(oldest.staged().nodes.len(), 2);
        assert!(!stack.can_undo());
    }

    #[test]
    fn test_snapshot_keeps_epoch() {
        let overlay = overlay_with(&["a"]);
        let mut stack = UndoStack::default();
        stack.push(&overlay).unwrap();
        stack.push(&overlay_with(&["a", "b"])).unwrap();
        let restored = stack.undo().unwrap().unwrap();
        assert_eq!(restored.epoch(), overlay.epoch());
    }
}
