//! Myers shortest-edit-script over arbitrary sequences.
//!
//! The common prefix and suffix are stripped first, so typical document edits
//! only pay for the changed middle. When the edit distance exceeds the cap the
//! middle is reported as a whole-range replace.

/// Default cap on the edit distance explored before falling back.
pub const DEFAULT_MAX_EDIT_DISTANCE: usize = 4_096;

/// One step of an edit script. Indices are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// `old[old] == new[new]`.
    Equal {
        /// Index in the old sequence.
        old: usize,
        /// Index in the new sequence.
        new: usize,
    },
    /// `old[old]` was removed.
    Delete {
        /// Index in the old sequence.
        old: usize,
    },
    /// `new[new]` was inserted.
    Insert {
        /// Index in the new sequence.
        new: usize,
    },
}

impl Edit {
    const fn shift(self, by: usize) -> Self {
        match self {
            Self::Equal { old, new } => Self::Equal {
                old: old + by,
                new: new + by,
            },
            Self::Delete { old } => Self::Delete { old: old + by },
            Self::Insert { new } => Self::Insert { new: new + by },
        }
    }
}

/// Computes an edit script turning `old` into `new`.
///
/// Edits are ordered by position; every element of both inputs appears in
/// exactly one edit.
#[must_use]
pub fn diff<T: PartialEq>(old: &[T], new: &[T], max_edit_distance: usize) -> Vec<Edit> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let old_rest = &old[prefix..];
    let new_rest = &new[prefix..];
    let suffix = old_rest
        .iter()
        .rev()
        .zip(new_rest.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old_rest[..old_rest.len() - suffix];
    let new_mid = &new_rest[..new_rest.len() - suffix];

    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    edits.extend((0..prefix).map(|i| Edit::Equal { old: i, new: i }));

    if let Some(middle) = shortest_edit(old_mid, new_mid, max_edit_distance) {
        edits.extend(middle.into_iter().map(|e| e.shift(prefix)));
    } else {
        edits.extend((0..old_mid.len()).map(|i| Edit::Delete { old: prefix + i }));
        edits.extend((0..new_mid.len()).map(|i| Edit::Insert { new: prefix + i }));
    }

    let old_tail = prefix + old_mid.len();
    let new_tail = prefix + new_mid.len();
    edits.extend((0..suffix).map(|i| Edit::Equal {
        old: old_tail + i,
        new: new_tail + i,
    }));
    edits
}

/// Greedy forward Myers search. Returns `None` when the distance exceeds `cap`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn shortest_edit<T: PartialEq>(a: &[T], b: &[T], cap: usize) -> Option<Vec<Edit>> {
    if a.is_empty() {
        return Some((0..b.len()).map(|new| Edit::Insert { new }).collect());
    }
    if b.is_empty() {
        return Some((0..a.len()).map(|old| Edit::Delete { old }).collect());
    }

    let n = a.len() as isize;
    let m = b.len() as isize;
    let max_d = (a.len() + b.len()).min(cap) as isize;
    let offset = max_d + 1;
    let mut v = vec![0_isize; (2 * max_d + 3) as usize];
    // trace[d] holds v[-d-1..=d+1] as it stood before round d.
    let mut trace: Vec<Vec<isize>> = Vec::new();

    for d in 0..=max_d {
        let lo = (offset - d - 1) as usize;
        let hi = (offset + d + 1) as usize;
        trace.push(v[lo..=hi].to_vec());

        let mut k = -d;
        while k <= d {
            let idx = (offset + k) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                return Some(backtrack(&trace, n, m));
            }
            k += 2;
        }
    }
    None
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn backtrack(trace: &[Vec<isize>], n: isize, m: isize) -> Vec<Edit> {
    let mut edits = Vec::new();
    let (mut x, mut y) = (n, m);

    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let get = |k: isize| v[(k + d + 1) as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && get(k - 1) < get(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = get(prev_k);
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            edits.push(Edit::Equal {
                old: (x - 1) as usize,
                new: (y - 1) as usize,
            });
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                edits.push(Edit::Insert {
                    new: (y - 1) as usize,
                });
            } else {
                edits.push(Edit::Delete {
                    old: (x - 1) as usize,
                });
            }
        }
        x = prev_x;
        y = prev_y;
    }

    edits.reverse();
    edits
}
