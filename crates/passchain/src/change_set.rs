//! Named dirty flags with an aggregate "anything changed" bit.
//!
//! Every stateful component (renderer, pass, TAA state) declares a closed set
//! of field names through [`tracked_fields!`] and keeps a [`ChangeSet`] over
//! them. Setters mark the field that changed; `setup`/`prepare` read and clear
//! the flags they consume.

use std::fmt;
use std::marker::PhantomData;

/// A closed enumeration of field names tracked by a [`ChangeSet`].
///
/// Implemented by [`tracked_fields!`]; the discriminant of each variant is its
/// index into [`TrackedField::ALL`].
pub trait TrackedField: Copy + Eq + fmt::Debug + 'static {
    const ALL: &'static [Self];

    fn index(self) -> usize;
}

/// Declares a field enum for use with [`ChangeSet`].
///
/// ```
/// passchain::tracked_fields! {
///     pub enum Field { Size, Camera }
/// }
/// let mut changes = passchain::ChangeSet::<Field>::new();
/// changes.set(Field::Camera);
/// assert!(changes.get(Field::Camera));
/// ```
#[macro_export]
macro_rules! tracked_fields {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::TrackedField for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn index(self) -> usize {
                self as usize
            }
        }
    };
}

/// Dirty flags for one component.
///
/// `any()` is true if and only if at least one field was set since the last
/// [`ChangeSet::reset`].
pub struct ChangeSet<F: TrackedField> {
    flags: Vec<bool>,
    any: bool,
    _fields: PhantomData<F>,
}

impl<F: TrackedField> ChangeSet<F> {
    /// Creates a change set with every field clean.
    pub fn new() -> Self {
        Self {
            flags: vec![false; F::ALL.len()],
            any: false,
            _fields: PhantomData,
        }
    }

    /// Creates a change set with every field dirty.
    pub fn all_set() -> Self {
        let mut changes = Self::new();
        changes.set_all();
        changes
    }

    pub fn set(&mut self, field: F) {
        if let Some(flag) = self.flags.get_mut(field.index()) {
            *flag = true;
            self.any = true;
        }
    }

    /// Returns whether `field` is dirty. Unknown fields read as clean.
    pub fn get(&self, field: F) -> bool {
        self.flags.get(field.index()).copied().unwrap_or(false)
    }

    pub fn any(&self) -> bool {
        self.any
    }

    /// Clears every field and the aggregate flag.
    pub fn reset(&mut self) {
        self.flags.iter_mut().for_each(|flag| *flag = false);
        self.any = false;
    }

    /// Marks every field dirty. Used once after construction so the first
    /// frame runs full setup.
    pub fn set_all(&mut self) {
        self.flags.iter_mut().for_each(|flag| *flag = true);
        self.any = !self.flags.is_empty();
    }

    /// Reads and clears a single field, leaving the others untouched.
    pub fn take(&mut self, field: F) -> bool {
        let Some(flag) = self.flags.get_mut(field.index()) else {
            return false;
        };
        let was_set = std::mem::replace(flag, false);
        self.any = self.flags.iter().any(|flag| *flag);
        was_set
    }

    /// Iterates over the fields currently marked dirty.
    pub fn dirty_fields(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL.iter().copied().filter(|field| self.get(*field))
    }
}

impl<F: TrackedField> Default for ChangeSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: TrackedField> fmt::Debug for ChangeSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.dirty_fields()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::tracked_fields! {
        enum Field { Size, Camera, Frame }
    }

    #[test]
    fn starts_clean() {
        let changes = ChangeSet::<Field>::new();
        assert!(!changes.any());
        assert!(Field::ALL.iter().all(|field| !changes.get(*field)));
    }

    #[test]
    fn any_tracks_sets_since_last_reset() {
        let sequences: &[&[Field]] = &[
            &[],
            &[Field::Size],
            &[Field::Camera, Field::Camera],
            &[Field::Frame, Field::Size, Field::Camera],
        ];
        for sequence in sequences {
            let mut changes = ChangeSet::<Field>::new();
            for field in *sequence {
                changes.set(*field);
            }
            assert_eq!(changes.any(), !sequence.is_empty(), "{sequence:?}");
            for field in Field::ALL {
                assert_eq!(changes.get(*field), sequence.contains(field));
            }
            changes.reset();
            assert!(!changes.any());
            assert_eq!(changes.dirty_fields().count(), 0);
        }
    }

    #[test]
    fn set_all_marks_every_field() {
        let changes = ChangeSet::<Field>::all_set();
        assert!(changes.any());
        assert_eq!(changes.dirty_fields().count(), Field::ALL.len());
    }

    #[test]
    fn take_clears_only_the_consumed_field() {
        let mut changes = ChangeSet::<Field>::new();
        changes.set(Field::Size);
        changes.set(Field::Frame);

        assert!(changes.take(Field::Size));
        assert!(!changes.take(Field::Size));
        assert!(changes.any());
        assert!(changes.get(Field::Frame));

        assert!(changes.take(Field::Frame));
        assert!(!changes.any());
    }
}
