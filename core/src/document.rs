//! The shared text document
//!
//! A character list (ordered-list CRDT) plus a per-peer cursor map (LWW).
//! Local edits mutate in place and hand back the operation to broadcast;
//! remote operations are validated and applied through [`TextDocument::apply`].

use crate::crdt::list::OrderedList;
use crate::crdt::lww::LwwMap;
use crate::crdt::ops::Op;
use crate::types::{ItemId, PeerId};
use crate::{Error, Result};

/// Replicated document state
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TextDocument {
    pub(crate) characters: OrderedList<char>,
    pub(crate) cursors: LwwMap<PeerId, u64>,
}

impl TextDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// The visible text
    pub fn text(&self) -> String {
        self.characters.iter_visible().map(|(_, ch)| *ch).collect()
    }

    /// Visible character count
    pub fn visible_len(&self) -> usize {
        self.characters.visible_len()
    }

    /// Item count including tombstones; only ever grows
    pub fn total_len(&self) -> usize {
        self.characters.len()
    }

    /// A peer's cursor position, if it ever reported one
    pub fn cursor_of(&self, peer: &PeerId) -> Option<usize> {
        self.cursors.get(peer).map(|position| *position as usize)
    }

    pub fn cursors(&self) -> impl Iterator<Item = (&PeerId, u64)> {
        self.cursors.iter().map(|(peer, register)| (peer, register.value))
    }

    /// Insert `ch` at visible position `index` with the fresh identifier
    /// `id`, returning the operation to broadcast.
    pub fn local_insert(&mut self, index: usize, ch: char, id: ItemId) -> Result<Op> {
        let after = self.characters.reference_for(index)?;
        self.characters.integrate(after, id, ch)?;
        Ok(Op::Insert { after, id, ch })
    }

    /// Delete the character at visible position `index`, tombstoning it
    /// with `at`.
    pub fn local_delete(&mut self, index: usize, at: ItemId) -> Result<Op> {
        let target = self
            .characters
            .visible_id(index)
            .ok_or(Error::IndexOutOfBounds(index))?;
        self.characters.delete(&target, at)?;
        Ok(Op::Delete { target, at })
    }

    /// Move `peer`'s cursor to `position` at time `at`
    pub fn local_set_cursor(&mut self, peer: PeerId, position: u64, at: ItemId) -> Op {
        self.cursors.put(peer, position, at);
        Op::SetCursor { peer, position, at }
    }

    /// Whether an item (visible or tombstoned) exists in the character list
    pub fn contains_item(&self, id: &ItemId) -> bool {
        self.characters.contains(id)
    }

    /// Apply a remote document operation. Clock and schema operations are
    /// handled by the engine, not here.
    pub fn apply(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Insert { after, id, ch } => self.characters.integrate(*after, *id, *ch),
            Op::Delete { target, at } => self.characters.delete(target, *at),
            Op::SetCursor { peer, position, at } => {
                self.cursors.put(*peer, *position, *at);
                Ok(())
            }
            Op::Clock(_) | Op::Schema(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId([n; 32])
    }

    fn id(ts: u64, p: u8) -> ItemId {
        ItemId::new(ts, peer(p))
    }

    #[test]
    fn local_typing_builds_text() {
        let mut doc = TextDocument::new();
        doc.local_insert(0, 'h', id(1, 1)).unwrap();
        doc.local_insert(1, 'i', id(2, 1)).unwrap();
        assert_eq!(doc.text(), "hi");
    }

    #[test]
    fn local_insert_returns_the_reference() {
        let mut doc = TextDocument::new();
        let first = doc.local_insert(0, 'a', id(1, 1)).unwrap();
        assert_eq!(
            first,
            Op::Insert {
                after: None,
                id: id(1, 1),
                ch: 'a'
            }
        );

        let second = doc.local_insert(1, 'b', id(2, 1)).unwrap();
        assert_eq!(
            second,
            Op::Insert {
                after: Some(id(1, 1)),
                id: id(2, 1),
                ch: 'b'
            }
        );
    }

    #[test]
    fn delete_leaves_a_tombstone() {
        let mut doc = TextDocument::new();
        doc.local_insert(0, 'a', id(1, 1)).unwrap();
        doc.local_insert(1, 'b', id(2, 1)).unwrap();

        let op = doc.local_delete(0, id(3, 1)).unwrap();
        assert_eq!(
            op,
            Op::Delete {
                target: id(1, 1),
                at: id(3, 1)
            }
        );
        assert_eq!(doc.text(), "b");
        assert_eq!(doc.total_len(), 2);
    }

    #[test]
    fn out_of_bounds_edits_are_rejected() {
        let mut doc = TextDocument::new();
        assert!(matches!(
            doc.local_insert(3, 'a', id(1, 1)),
            Err(Error::IndexOutOfBounds(3))
        ));
        assert!(matches!(doc.local_delete(0, id(1, 1)), Err(Error::IndexOutOfBounds(0))));
    }

    #[test]
    fn cursor_updates_follow_lww() {
        let mut doc = TextDocument::new();
        doc.local_set_cursor(peer(1), 4, id(9, 1));
        doc.apply(&Op::SetCursor {
            peer: peer(1),
            position: 2,
            at: id(5, 1),
        })
        .unwrap();

        assert_eq!(doc.cursor_of(&peer(1)), Some(4));
    }

    #[test]
    fn apply_rejects_unknown_targets() {
        let mut doc = TextDocument::new();
        let missing = id(9, 9);
        assert!(doc
            .apply(&Op::Delete {
                target: missing,
                at: id(10, 1)
            })
            .is_err());
        assert!(doc
            .apply(&Op::Insert {
                after: Some(missing),
                id: id(10, 1),
                ch: 'x'
            })
            .is_err());
        assert!(!doc.contains_item(&missing));
    }
}
