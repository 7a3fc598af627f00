//! Change tracking for documents and the containers they own.
//!
//! [`ChangedPaths`] is the ordered set of dotted paths mutated since load or since the last save.
//! [`TrackedList`] and [`TrackedDict`] are borrowed views over a list or dict field value. Every
//! mutating call first records its path against the owning document and then delegates to the
//! underlying container. Per-element assignments record `field.index` / `field.key`; every other
//! structural mutation records the container path itself.

use std::{
    cmp::Ordering,
    ops::{Bound, Range, RangeBounds},
};

use crate::{
    document::DocumentInstance,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{Field, FieldKind},
    reference::Reference,
    registry::Registry,
    value::{Value, ValueMap},
};

/// Ordered set of changed dotted paths.
///
/// A recorded path subsumes all of its descendants: marking `comments` after `comments.1.body`
/// collapses both into `comments`, and marking `comments.2` afterwards is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedPaths {
    paths: Vec<String>,
}

fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

impl ChangedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` unless it, or one of its ancestors, is already recorded.
    pub fn mark(&mut self, path: impl Into<String>) {
        let path = path.into();

        if self.covers(&path) {
            return;
        }

        self.paths.retain(|existing| !is_descendant(existing, &path));
        self.paths.push(path);
    }

    /// Returns true if `path` or one of its ancestors is recorded.
    pub fn covers(&self, path: &str) -> bool {
        self.paths
            .iter()
            .any(|existing| existing == path || is_descendant(path, existing))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|existing| existing == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.clone()
    }
}

impl<S: Into<String>> FromIterator<S> for ChangedPaths {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut paths = ChangedPaths::new();
        for path in iter {
            paths.mark(path);
        }
        paths
    }
}

pub(crate) struct PathTracker<'a> {
    changed: &'a mut ChangedPaths,
    path: String,
}

impl<'a> PathTracker<'a> {
    pub(crate) fn new(changed: &'a mut ChangedPaths, path: String) -> Self {
        Self { changed, path }
    }

    fn mark(&mut self) {
        self.changed.mark(self.path.clone());
    }

    fn mark_child(&mut self, key: &str) {
        self.changed.mark(format!("{}.{}", self.path, key));
    }

    fn child(&mut self, key: &str) -> PathTracker<'_> {
        PathTracker {
            changed: self.changed,
            path: format!("{}.{}", self.path, key),
        }
    }
}

fn clamp_range(range: impl RangeBounds<usize>, len: usize) -> Range<usize> {
    let start = match range.start_bound() {
        Bound::Included(&start) => start,
        Bound::Excluded(&start) => start.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&end) => end.saturating_add(1),
        Bound::Excluded(&end) => end,
        Bound::Unbounded => len,
    };
    let end = end.min(len);

    start.min(end)..end
}

fn prepare_item(item: Option<&Field>, value: Value) -> Value {
    match item {
        Some(field) => field.prepare(value),
        None => value,
    }
}

/// A tracked view over a list value owned by a document.
pub struct TrackedList<'a> {
    items: &'a mut Vec<Value>,
    tracker: PathTracker<'a>,
    item: Option<&'a Field>,
}

impl<'a> TrackedList<'a> {
    pub(crate) fn new(items: &'a mut Vec<Value>, tracker: PathTracker<'a>, item: Option<&'a Field>) -> Self {
        Self { items, tracker, item }
    }

    /// The dotted path this list is tracked under.
    pub fn path(&self) -> &str {
        &self.tracker.path
    }

    fn resolve(&self, index: isize) -> Option<usize> {
        let len = self.items.len() as isize;
        let index = if index < 0 { len + index } else { index };

        (0..len).contains(&index).then_some(index as usize)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the element at `index`; negative indices count from the end.
    pub fn get(&self, index: isize) -> Option<&Value> {
        self.resolve(index).map(|index| &self.items[index])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        self.items
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.items.iter().position(|item| item == value)
    }

    /// Replaces the element at `index`, recording `path.<index>` when the value differs.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Operation`] if the index is out of range.
    pub fn set(&mut self, index: isize, value: impl Into<Value>) -> DocumentStoreResult<Value> {
        let position = self.resolve(index)
            .ok_or_else(|| DocumentStoreError::Operation(format!("list assignment index {} out of range", index)))?;
        let value = prepare_item(self.item, value.into());

        if self.items[position] == value {
            return Ok(value);
        }

        self.tracker.mark_child(&position.to_string());
        Ok(std::mem::replace(&mut self.items[position], value))
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.tracker.mark();
        self.items.push(prepare_item(self.item, value.into()));
    }

    pub fn extend<I, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.tracker.mark();
        let item = self.item;
        self.items.extend(values.into_iter().map(|value| prepare_item(item, value.into())));
    }

    /// Inserts before `index`, clamping out-of-range positions to the ends of the list.
    pub fn insert(&mut self, index: isize, value: impl Into<Value>) {
        self.tracker.mark();
        let len = self.items.len() as isize;
        let position = if index < 0 { (len + index).max(0) } else { index.min(len) };
        self.items.insert(position as usize, prepare_item(self.item, value.into()));
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.tracker.mark();
        self.items.pop()
    }

    /// Removes and returns the element at `index`; negative indices count from the end.
    pub fn remove(&mut self, index: isize) -> Option<Value> {
        self.tracker.mark();
        self.resolve(index).map(|position| self.items.remove(position))
    }

    /// Removes the first element equal to `value`, returning whether one was found.
    pub fn remove_item(&mut self, value: &Value) -> bool {
        self.tracker.mark();
        match self.index_of(value) {
            Some(position) => {
                self.items.remove(position);
                true
            }
            None => false,
        }
    }

    /// Replaces the elements in `range` with `values`, returning the removed elements.
    pub fn splice<R, I, V>(&mut self, range: R, values: I) -> Vec<Value>
    where
        R: RangeBounds<usize>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.tracker.mark();
        let range = clamp_range(range, self.items.len());
        let item = self.item;
        let replacement = values
            .into_iter()
            .map(|value| prepare_item(item, value.into()))
            .collect::<Vec<_>>();

        self.items.splice(range, replacement).collect()
    }

    /// Removes the elements in `range`.
    pub fn drain<R: RangeBounds<usize>>(&mut self, range: R) -> Vec<Value> {
        self.tracker.mark();
        let range = clamp_range(range, self.items.len());
        self.items.drain(range).collect()
    }

    pub fn sort(&mut self) {
        self.tracker.mark();
        self.items.sort_by(Value::compare);
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.tracker.mark();
        self.items.sort_by(compare);
    }

    /// Sorts embedded documents by the value of one of their fields.
    pub fn sort_by_key_field(&mut self, name: &str) {
        self.tracker.mark();
        self.items.sort_by(|a, b| sort_key(a, name).compare(&sort_key(b, name)));
    }

    pub fn reverse(&mut self) {
        self.tracker.mark();
        self.items.reverse();
    }

    pub fn clear(&mut self) {
        self.tracker.mark();
        self.items.clear();
    }

    pub fn truncate(&mut self, len: usize) {
        self.tracker.mark();
        self.items.truncate(len);
    }

    /// Repeats the current contents `times` times in place; zero empties the list.
    pub fn repeat(&mut self, times: usize) {
        self.tracker.mark();
        let base = std::mem::take(self.items);
        *self.items = (0..times).flat_map(|_| base.iter().cloned()).collect();
    }

    /// A tracked view over a nested list at `index`.
    pub fn list_mut(&mut self, index: isize) -> Option<TrackedList<'_>> {
        let position = self.resolve(index)?;
        let item = self.item.and_then(Field::item_field);

        match &mut self.items[position] {
            Value::List(items) => Some(TrackedList::new(items, self.tracker.child(&position.to_string()), item)),
            _ => None,
        }
    }

    /// A tracked view over a nested dict at `index`.
    pub fn dict_mut(&mut self, index: isize) -> Option<TrackedDict<'_>> {
        let position = self.resolve(index)?;
        let item = self.item.and_then(Field::item_field);

        match &mut self.items[position] {
            Value::Dict(map) => Some(TrackedDict::new(map, self.tracker.child(&position.to_string()), item)),
            _ => None,
        }
    }

    /// Mutable access to an embedded document element; it tracks its own changes.
    pub fn embedded_mut(&mut self, index: isize) -> Option<&mut DocumentInstance> {
        let position = self.resolve(index)?;
        self.items[position].as_document_mut()
    }

    /// Mutable access to a reference element, for resolution only.
    pub fn reference_mut(&mut self, index: isize) -> Option<&mut Reference> {
        let position = self.resolve(index)?;
        self.items[position].as_reference_mut()
    }
}

/// A filterable view over a list of embedded documents.
///
/// The view starts out selecting every element. [`filter`](Self::filter) and
/// [`exclude`](Self::exclude) narrow the selection by field equality and can be chained.
/// [`update`](Self::update), [`delete`](Self::delete) and [`create`](Self::create) record their
/// changes against the owning document, which is saved once the view is dropped.
///
/// ```ignore
/// let mut comments = post.embedded_list_mut("comments")?;
/// let removed = comments.filter(values! { "author" => "spam" })?.delete();
/// store.save(&mut post).await?;
/// ```
pub struct EmbeddedList<'a> {
    list: TrackedList<'a>,
    selected: Vec<usize>,
}

type Conditions = Vec<(String, Value)>;

fn conditions<I, K, V>(values: I) -> Conditions
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    values.into_iter().map(|(name, value)| (name.into(), value.into())).collect()
}

fn describe(conditions: &Conditions) -> String {
    conditions
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn unknown_field(doc: &DocumentInstance, name: &str) -> DocumentStoreError {
    DocumentStoreError::UnknownField {
        class: doc.class_name().to_string(),
        field: name.to_string(),
    }
}

/// True when every condition equals the element's value. An unset field matches `Null`.
fn matches_all(doc: &DocumentInstance, conditions: &Conditions) -> DocumentStoreResult<bool> {
    for (name, expected) in conditions {
        let field = doc.field(name).ok_or_else(|| unknown_field(doc, name))?;
        let expected = field.prepare(expected.clone());
        let matched = match doc.get(name) {
            Some(actual) => actual == &expected,
            None => expected.is_null(),
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

impl<'a> EmbeddedList<'a> {
    pub(crate) fn new(list: TrackedList<'a>) -> Self {
        let selected = list
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.as_document().is_some())
            .map(|(index, _)| index)
            .collect();

        Self { list, selected }
    }

    fn class(&self) -> Option<&str> {
        match self.list.item.map(Field::kind) {
            Some(FieldKind::Embedded { class }) => Some(class.as_str()),
            _ => None,
        }
    }

    fn document(&self, index: usize) -> Option<&DocumentInstance> {
        self.list.items.get(index).and_then(Value::as_document)
    }

    /// The dotted path of the underlying list.
    pub fn path(&self) -> &str {
        self.list.path()
    }

    /// Selected elements in list order.
    pub fn iter(&self) -> impl Iterator<Item = &DocumentInstance> {
        self.selected.iter().filter_map(|&index| self.document(index))
    }

    pub fn count(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn first(&self) -> Option<&DocumentInstance> {
        self.iter().next()
    }

    fn select(mut self, conditions: Conditions, keep: bool) -> DocumentStoreResult<Self> {
        let mut selected = Vec::with_capacity(self.selected.len());

        for &index in &self.selected {
            if let Some(doc) = self.document(index) {
                if matches_all(doc, &conditions)? == keep {
                    selected.push(index);
                }
            }
        }

        self.selected = selected;
        Ok(self)
    }

    /// Keeps the selected elements whose fields equal every given value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::UnknownField`] if a name is not a field of an element.
    pub fn filter<I, K, V>(self, values: I) -> DocumentStoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.select(conditions(values), true)
    }

    /// Drops the selected elements whose fields equal every given value.
    pub fn exclude<I, K, V>(self, values: I) -> DocumentStoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.select(conditions(values), false)
    }

    /// The single selected element matching `values`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DoesNotExist`] when nothing matches and
    /// [`DocumentStoreError::MultipleObjectsReturned`] when more than one element does.
    pub fn get<I, K, V>(&self, values: I) -> DocumentStoreResult<&DocumentInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let conditions = conditions(values);
        let mut matched = Vec::new();

        for doc in self.iter() {
            if matches_all(doc, &conditions)? {
                matched.push(doc);
            }
        }

        match matched.as_slice() {
            [doc] => Ok(*doc),
            [] => Err(DocumentStoreError::DoesNotExist(
                self.class().unwrap_or("EmbeddedDocument").to_string(),
                describe(&conditions),
            )),
            many => Err(DocumentStoreError::MultipleObjectsReturned(format!(
                "{} items returned, instead of 1",
                many.len()
            ))),
        }
    }

    /// Appends a new element built from `values` and adds it to the selection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Operation`] for lists whose item class is not fixed, and
    /// any construction error of the item class.
    pub fn create<I, K, V>(&mut self, registry: &Registry, values: I) -> DocumentStoreResult<&mut DocumentInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let class = self
            .class()
            .ok_or_else(|| DocumentStoreError::Operation(format!("list '{}' has no fixed embedded class", self.path())))?
            .to_string();
        let doc = registry.create(&class, values)?;
        let path = self.path().to_string();

        self.list.push(doc);
        let index = self.list.len() - 1;
        self.selected.push(index);

        self.list
            .items
            .get_mut(index)
            .and_then(Value::as_document_mut)
            .ok_or_else(|| DocumentStoreError::Operation(format!("list '{}' did not keep the new element", path)))
    }

    /// Assigns `values` on every selected element and returns how many were updated.
    ///
    /// Names are checked against every selected element before anything is assigned.
    pub fn update<I, K, V>(&mut self, values: I) -> DocumentStoreResult<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = conditions(values);

        for doc in self.iter() {
            if let Some((name, _)) = values.iter().find(|(name, _)| doc.field(name).is_none() && !doc.meta().is_dynamic()) {
                return Err(unknown_field(doc, name));
            }
        }

        for &index in &self.selected {
            let Some(doc) = self.list.items.get_mut(index).and_then(Value::as_document_mut) else {
                continue;
            };
            for (name, value) in &values {
                doc.set(name, value.clone())?;
            }
        }
        Ok(self.selected.len())
    }

    /// Removes the selected elements from the list and returns how many were removed.
    pub fn delete(&mut self) -> usize {
        let removed = self.selected.len();

        for &index in self.selected.iter().rev() {
            self.list.remove(index as isize);
        }
        self.selected.clear();
        removed
    }
}

fn sort_key(value: &Value, name: &str) -> Value {
    value
        .as_document()
        .and_then(|doc| doc.get(name))
        .cloned()
        .unwrap_or(Value::Null)
}

/// A tracked view over a dict value owned by a document.
pub struct TrackedDict<'a> {
    map: &'a mut ValueMap,
    tracker: PathTracker<'a>,
    item: Option<&'a Field>,
}

impl<'a> TrackedDict<'a> {
    pub(crate) fn new(map: &'a mut ValueMap, tracker: PathTracker<'a>, item: Option<&'a Field>) -> Self {
        Self { map, tracker, item }
    }

    pub fn path(&self) -> &str {
        &self.tracker.path
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Sets `key`, recording `path.<key>` when the value differs.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = prepare_item(self.item, value.into());

        if self.map.get(&key) == Some(&value) {
            return Some(value);
        }

        self.tracker.mark_child(&key);
        self.map.insert(key, value)
    }

    /// Removes `key`, recording `path.<key>` if it was present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.map.remove(key);

        if removed.is_some() {
            self.tracker.mark_child(key);
        }

        removed
    }

    /// Removes and returns the entry with the smallest key.
    pub fn pop_entry(&mut self) -> Option<(String, Value)> {
        self.tracker.mark();
        self.map.pop_first()
    }

    /// Inserts `value` under `key` if absent and returns the stored value.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &Value {
        let key = key.into();

        if !self.map.contains_key(&key) {
            self.tracker.mark_child(&key);
            let value = prepare_item(self.item, value.into());
            self.map.insert(key.clone(), value);
        }

        &self.map[&key]
    }

    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.tracker.mark();
        let item = self.item;
        self.map.extend(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), prepare_item(item, value.into())))
        );
    }

    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&String, &mut Value) -> bool,
    {
        self.tracker.mark();
        self.map.retain(keep);
    }

    pub fn clear(&mut self) {
        self.tracker.mark();
        self.map.clear();
    }

    pub fn list_mut(&mut self, key: &str) -> Option<TrackedList<'_>> {
        let item = self.item.and_then(Field::item_field);

        match self.map.get_mut(key) {
            Some(Value::List(items)) => Some(TrackedList::new(items, self.tracker.child(key), item)),
            _ => None,
        }
    }

    pub fn dict_mut(&mut self, key: &str) -> Option<TrackedDict<'_>> {
        let item = self.item.and_then(Field::item_field);

        match self.map.get_mut(key) {
            Some(Value::Dict(map)) => Some(TrackedDict::new(map, self.tracker.child(key), item)),
            _ => None,
        }
    }

    pub fn embedded_mut(&mut self, key: &str) -> Option<&mut DocumentInstance> {
        self.map.get_mut(key).and_then(Value::as_document_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_path_subsumes_children() {
        let mut changed = ChangedPaths::new();
        changed.mark("comments.1.body");
        changed.mark("title");
        changed.mark("comments");
        changed.mark("comments.2");

        assert_eq!(changed.to_vec(), vec!["title".to_string(), "comments".to_string()]);
        assert!(changed.covers("comments.0"));
        assert!(!changed.covers("comment"));
    }

    #[test]
    fn element_assignment_marks_index() {
        let mut items = vec![Value::from(1), Value::from(2), Value::from(3), Value::from(4)];
        let mut changed = ChangedPaths::new();
        let mut list = TrackedList::new(&mut items, PathTracker::new(&mut changed, "widgets".into()), None);

        list.set(-1, 5).unwrap();
        list.set(0, 1).unwrap();

        assert_eq!(changed.to_vec(), vec!["widgets.3".to_string()]);
        assert_eq!(items[3], Value::Int(5));
    }

    #[test]
    fn slice_operations_mark_whole_list() {
        let mut items = vec![Value::from(1), Value::from(2), Value::from(3)];
        let mut changed = ChangedPaths::new();
        {
            let mut list = TrackedList::new(&mut items, PathTracker::new(&mut changed, "widgets".into()), None);
            list.splice(0..2, [7, 8, 9]);
            assert_eq!(list.drain(3..10), vec![Value::Int(3)]);
        }

        assert_eq!(changed.to_vec(), vec!["widgets".to_string()]);
        assert_eq!(items, vec![Value::Int(7), Value::Int(8), Value::Int(9)]);
    }

    #[test]
    fn repeat_copies_contents_and_marks_whole_list() {
        let mut items = vec![Value::from("a"), Value::from(1)];
        let mut changed = ChangedPaths::new();
        {
            let mut list = TrackedList::new(&mut items, PathTracker::new(&mut changed, "widgets".into()), None);
            list.repeat(2);
            assert_eq!(list.len(), 4);
        }

        assert_eq!(changed.to_vec(), vec!["widgets".to_string()]);
        assert_eq!(items, vec![Value::from("a"), Value::from(1), Value::from("a"), Value::from(1)]);

        let mut changed = ChangedPaths::new();
        TrackedList::new(&mut items, PathTracker::new(&mut changed, "widgets".into()), None).repeat(0);
        assert!(items.is_empty());
    }

    #[test]
    fn nested_list_marks_nested_index() {
        let mut items = vec![Value::from(vec![1, 2]), Value::from(vec![3])];
        let mut changed = ChangedPaths::new();
        {
            let mut list = TrackedList::new(&mut items, PathTracker::new(&mut changed, "matrix".into()), None);
            let mut row = list.list_mut(1).unwrap();
            row.set(0, 30).unwrap();
        }

        assert_eq!(changed.to_vec(), vec!["matrix.1.0".to_string()]);
    }

    #[test]
    fn dict_key_changes_mark_key_paths() {
        let mut map = ValueMap::new();
        map.insert("a".into(), Value::from(1));
        let mut changed = ChangedPaths::new();
        {
            let mut dict = TrackedDict::new(&mut map, PathTracker::new(&mut changed, "mapping".into()), None);
            dict.insert("a", 1);
            dict.insert("b", 2);
            dict.remove("a");
            dict.remove("missing");
        }

        assert_eq!(changed.to_vec(), vec!["mapping.b".to_string(), "mapping.a".to_string()]);
    }

    #[test]
    fn clear_marks_container() {
        let mut map = ValueMap::new();
        let mut changed = ChangedPaths::new();
        TrackedDict::new(&mut map, PathTracker::new(&mut changed, "mapping".into()), None).clear();

        assert!(changed.contains("mapping"));
    }
}
