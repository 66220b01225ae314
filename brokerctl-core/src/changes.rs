use std::cmp::Ordering;

/// Difference between two snapshots of a sorted list.
#[derive(Debug, Clone, PartialEq)]
pub struct Changes<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub modified: Vec<T>,
}

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Changes {
            added: Vec::new(),
            removed: Vec::new(),
            modified: Vec::new(),
        }
    }
}

impl<T> Changes<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Human readable summary, e.g. `added ["a", "b"], removed ["c"]`.
    pub fn description<F>(&self, name: F) -> String
    where
        F: Fn(&T) -> String,
    {
        let parts: Vec<String> = [
            ("added", &self.added),
            ("removed", &self.removed),
            ("modified", &self.modified),
        ]
        .into_iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(label, items)| format!("{} {}", label, crate::utils::description(items, &name)))
        .collect();
        parts.join(", ")
    }
}

/// Returns the changes between two lists sorted by `compare`.
///
/// Both lists must be sorted with the same comparator; the diff is a single merge pass. When
/// there is no previous list every current item is reported as added.
pub fn changes<T, C>(last: Option<&[T]>, current: &[T], compare: C) -> Changes<T>
where
    T: Clone,
    C: Fn(&T, &T) -> Ordering,
{
    merge(last, current, compare, |_: &T, _: &T| true)
}

/// Like [`changes`], additionally reporting items present in both lists for which `unchanged`
/// returns false.
pub fn changes_with<T, C, U>(last: Option<&[T]>, current: &[T], compare: C, unchanged: U) -> Changes<T>
where
    T: Clone,
    C: Fn(&T, &T) -> Ordering,
    U: Fn(&T, &T) -> bool,
{
    merge(last, current, compare, unchanged)
}

fn merge<T, C, U>(last: Option<&[T]>, current: &[T], compare: C, unchanged: U) -> Changes<T>
where
    T: Clone,
    C: Fn(&T, &T) -> Ordering,
    U: Fn(&T, &T) -> bool,
{
    let Some(last) = last else {
        return Changes {
            added: current.to_vec(),
            ..Default::default()
        };
    };

    let mut diff = Changes::default();
    let (mut i, mut j) = (0, 0);
    while i < last.len() && j < current.len() {
        match compare(&last[i], &current[j]) {
            Ordering::Equal => {
                if !unchanged(&last[i], &current[j]) {
                    diff.modified.push(current[j].clone());
                }
                i += 1;
                j += 1;
            }
            // current[j] sorts first, so it is not in last
            Ordering::Greater => {
                diff.added.push(current[j].clone());
                j += 1;
            }
            // last[i] sorts first, so it is gone from current
            Ordering::Less => {
                diff.removed.push(last[i].clone());
                i += 1;
            }
        }
    }
    diff.removed.extend_from_slice(&last[i..]);
    diff.added.extend_from_slice(&current[j..]);
    diff
}
