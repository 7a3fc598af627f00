//! Partial updates and dotted-path access on stored documents.

use bson::{Bson, Document};

/// A partial update: paths to set and paths to remove.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    set: Document,
    unset: Vec<String>,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Bson) -> &mut Self {
        let path = path.into();
        self.unset.retain(|existing| existing != &path);
        self.set.insert(path, value);
        self
    }

    pub fn unset(&mut self, path: impl Into<String>) -> &mut Self {
        let path = path.into();
        self.set.remove(&path);
        if !self.unset.contains(&path) {
            self.unset.push(path);
        }
        self
    }

    pub fn sets(&self) -> &Document {
        &self.set
    }

    pub fn unsets(&self) -> &[String] {
        &self.unset
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// The update in operator form: `{"$set": {..}, "$unset": {path: ""}}`, omitting empty operators.
    pub fn to_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.unset.is_empty() {
            let unset = self
                .unset
                .iter()
                .map(|path| (path.clone(), Bson::String(String::new())))
                .collect::<Document>();
            update.insert("$unset", unset);
        }
        update
    }

    /// Applies the update to `doc` in place.
    pub fn apply(&self, doc: &mut Document) {
        for (path, value) in &self.set {
            set_path(doc, path, value.clone());
        }
        for path in &self.unset {
            remove_path(doc, path);
        }
    }
}

/// Reads a dotted path; numeric segments index into arrays.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes a dotted path, creating intermediate subdocuments. Writing past the end of an
/// array pads it with nulls.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_) | Bson::Array(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(child) = doc.get_mut(head) {
                set_in(child, rest, value);
            }
        }
    }
}

fn set_in(target: &mut Bson, path: &str, value: Bson) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    match target {
        Bson::Document(doc) => match rest {
            None => {
                doc.insert(head, value);
            }
            Some(rest) => set_path(doc, &format!("{}.{}", head, rest), value),
        },
        Bson::Array(items) => {
            let Ok(index) = head.parse::<usize>() else {
                return;
            };
            if items.len() <= index {
                items.resize(index + 1, Bson::Null);
            }
            match rest {
                None => items[index] = value,
                Some(rest) => {
                    if !matches!(items[index], Bson::Document(_) | Bson::Array(_)) {
                        items[index] = Bson::Document(Document::new());
                    }
                    set_in(&mut items[index], rest, value);
                }
            }
        }
        _ => {}
    }
}

/// Removes a dotted path. Removing an array element leaves a null in its place.
pub fn remove_path(doc: &mut Document, path: &str) {
    match path.rsplit_once('.') {
        None => {
            doc.remove(path);
        }
        Some((parent, last)) => {
            let Some(container) = get_path_mut(doc, parent) else {
                return;
            };
            match container {
                Bson::Document(inner) => {
                    inner.remove(last);
                }
                Bson::Array(items) => {
                    if let Some(item) = last.parse::<usize>().ok().and_then(|index| items.get_mut(index)) {
                        *item = Bson::Null;
                    }
                }
                _ => {}
            }
        }
    }
}

fn get_path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get_mut(first)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn set_and_unset_are_exclusive() {
        let mut update = UpdateSpec::new();
        update.set("a", Bson::Int32(1)).unset("a").set("b", Bson::Int32(2));

        assert_eq!(update.to_document(), doc! { "$set": { "b": 2 }, "$unset": { "a": "" } });
    }

    #[test]
    fn dotted_paths_reach_into_arrays() {
        let mut stored = doc! { "comments": [ { "body": "x" }, { "body": "y" } ], "meta": { "n": 1 } };
        assert_eq!(get_path(&stored, "comments.1.body"), Some(&Bson::String("y".into())));

        let mut update = UpdateSpec::new();
        update.set("comments.0.body", Bson::String("z".into()));
        update.set("meta.tags.0", Bson::String("t".into()));
        update.unset("meta.n");
        update.apply(&mut stored);

        assert_eq!(
            stored,
            doc! { "comments": [ { "body": "z" }, { "body": "y" } ], "meta": { "tags": { "0": "t" } } }
        );
    }
}
