//! Revision-by-revision change classification.
//!
//! Every object (re)defined by an incremental update is compared with its
//! definition in the previous revision and sorted into a [`ChangeClass`].
//! Newly added objects count only through the objects that start to
//! reference them, so an orphan font or image is structural while the
//! modified page that draws it is content.

use crate::error::Result;
use crate::pdf::object::{Dictionary, Object, ObjectRef};
use crate::pdf::xref::XRefEntry;
use crate::pdf::PdfFile;
use serde::Serialize;
use std::collections::HashSet;

/// What kind of modification a changed object represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    /// Cross-reference and object streams, identical rewrites, orphans
    Structural,
    /// Signature dictionaries, signature fields and their plumbing
    Signature,
    /// Values and appearances of existing form fields, document info
    FormFill,
    /// Non-widget annotations
    Annotation,
    /// Anything that alters what the document says
    Content,
}

/// One classified object change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Revision (oldest first) that made the change
    pub revision: usize,
    pub object: ObjectRef,
    pub class: ChangeClass,
    pub detail: String,
}

impl Change {
    fn new(
        revision: usize,
        object: ObjectRef,
        class: ChangeClass,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            revision,
            object,
            class,
            detail: detail.into(),
        }
    }
}

/// Classify every object change made after `base_len` bytes.
///
/// Revisions ending at or before `base_len` are treated as the baseline.
pub fn changes_after(file: &PdfFile, base_len: usize) -> Result<Vec<Change>> {
    let mut out = Vec::new();
    let revisions = file.revisions();
    let first_later = revisions.iter().position(|r| r.end > base_len);
    let Some(first_later) = first_later else {
        return Ok(out);
    };

    for rev in &revisions[first_later..] {
        let new_view = file.revision_view(rev.index)?;
        let old_view = match rev.index {
            0 => None,
            i => Some(file.revision_view(i - 1)?),
        };
        let ctx = RevisionContext::new(&new_view, old_view.as_ref(), rev.index);

        for (id, entry) in &rev.entries {
            let object = match entry {
                XRefEntry::InUse { generation, .. } => ObjectRef::new(*id, *generation),
                XRefEntry::Compressed { .. } => ObjectRef::new(*id, 0),
                XRefEntry::Free { .. } => {
                    if let Some(change) = ctx.classify_deleted(*id)? {
                        out.push(change);
                    }
                    continue;
                },
            };
            out.push(ctx.classify(object)?);
        }
    }
    for change in out.iter().filter(|c| c.class != ChangeClass::Structural) {
        log::debug!(
            "Revision {}: {} {:?} ({})",
            change.revision,
            change.object,
            change.class,
            change.detail
        );
    }
    Ok(out)
}

struct RevisionContext<'a> {
    new: &'a PdfFile,
    old: Option<&'a PdfFile>,
    revision: usize,
    info: Option<ObjectRef>,
    root: Option<ObjectRef>,
}

impl<'a> RevisionContext<'a> {
    fn new(new: &'a PdfFile, old: Option<&'a PdfFile>, revision: usize) -> Self {
        Self {
            new,
            old,
            revision,
            info: new.trailer().get("Info").and_then(Object::as_reference),
            root: new.trailer().get("Root").and_then(Object::as_reference),
        }
    }

    /// The previous definition of `id`, or `None` when the previous
    /// revision has no live entry for it.
    fn old_object(&self, id: u32) -> Result<Option<Object>> {
        let Some(old) = self.old else {
            return Ok(None);
        };
        let generation = match old.entry(id) {
            Some(XRefEntry::InUse { generation, .. }) => generation,
            Some(XRefEntry::Compressed { .. }) => 0,
            Some(XRefEntry::Free { .. }) | None => return Ok(None),
        };
        old.get_object(ObjectRef::new(id, generation)).map(Some)
    }

    fn classify_deleted(&self, id: u32) -> Result<Option<Change>> {
        let object = ObjectRef::new(id, 0);
        let old = match self.old_object(id) {
            Ok(Some(old)) => old,
            Ok(None) => return Ok(None),
            Err(e) => return Ok(Some(self.unreadable(object, &e))),
        };
        let class = if is_markup_annotation(&old) {
            ChangeClass::Annotation
        } else {
            ChangeClass::Content
        };
        Ok(Some(Change::new(self.revision, object, class, "object deleted")))
    }

    fn unreadable(&self, object: ObjectRef, err: &crate::error::Error) -> Change {
        log::warn!(
            "Revision {}: previous definition of {} unreadable: {}",
            self.revision,
            object,
            err
        );
        Change::new(
            self.revision,
            object,
            ChangeClass::Content,
            "previous definition unreadable",
        )
    }

    fn classify(&self, r: ObjectRef) -> Result<Change> {
        let new = self.new.get_object(r)?;
        let old = match self.old_object(r.id) {
            Ok(old) => old,
            Err(e) => return Ok(self.unreadable(r, &e)),
        };
        let change = |class, detail: &str| Ok(Change::new(self.revision, r, class, detail));

        if old.as_ref() == Some(&new) {
            return change(ChangeClass::Structural, "unchanged rewrite");
        }
        if matches!(new.dict_type(), Some("XRef") | Some("ObjStm")) {
            return change(ChangeClass::Structural, "cross-reference or object stream");
        }
        if old.as_ref().is_some_and(|o| is_stream(o) != is_stream(&new)) {
            return change(ChangeClass::Content, "object changed kind");
        }
        if is_signature_value(&new) {
            return match old {
                None => change(ChangeClass::Signature, "signature dictionary added"),
                Some(_) => change(ChangeClass::Content, "existing signature dictionary altered"),
            };
        }
        if Some(r) == self.root {
            return self.classify_catalog(r, old.as_ref(), &new);
        }
        if Some(r) == self.info {
            return change(ChangeClass::FormFill, "document info edited");
        }
        if self.is_acroform(r)? {
            let old_form = old.as_ref().and_then(Object::as_dict);
            let (class, detail) = self.classify_acroform(old_form, &new)?;
            return change(class, detail.as_str());
        }
        if new.dict_type() == Some("DSS") {
            return change(ChangeClass::Signature, "document security store");
        }
        if self.is_signature_field(&new)? {
            let class = match &old {
                _ if is_stream(&new) => ChangeClass::Content,
                None => ChangeClass::Signature,
                Some(o) if o.get("V").is_none() && self.was_signature_field(o)? => {
                    ChangeClass::Signature
                },
                Some(_) => ChangeClass::Content,
            };
            return change(class, "signature field");
        }
        if new.dict_type() == Some("Page") {
            let (class, detail) = self.classify_page(old.as_ref(), &new)?;
            return change(class, detail.as_str());
        }
        if is_widget(&new) || is_form_field(&new) {
            return match old {
                None => change(ChangeClass::Content, "form field added"),
                Some(o) => {
                    let changed = changed_keys(o.as_dict(), new.as_dict());
                    if changed.iter().all(|k| FIELD_VALUE_KEYS.contains(&k.as_str())) {
                        change(ChangeClass::FormFill, "form field value changed")
                    } else {
                        change(ChangeClass::Content, "form field definition changed")
                    }
                },
            };
        }
        let was_markup = old.as_ref().map_or(true, is_markup_annotation);
        if is_markup_annotation(&new) && !is_stream(&new) && was_markup {
            return change(ChangeClass::Annotation, "annotation added or modified");
        }
        if old.is_none() {
            if is_form_xobject(&new) && self.is_signature_appearance(r)? {
                return change(ChangeClass::Signature, "signature appearance");
            }
            return change(ChangeClass::Structural, "new object");
        }
        if is_form_xobject(&new) && self.is_field_appearance(r)? {
            return change(ChangeClass::FormFill, "field appearance changed");
        }
        change(ChangeClass::Content, "object modified")
    }

    fn classify_catalog(&self, r: ObjectRef, old: Option<&Object>, new: &Object) -> Result<Change> {
        let old_dict = old.and_then(Object::as_dict);
        let new_dict = new.as_dict();
        let mut class = ChangeClass::Structural;
        let mut details = Vec::new();
        for key in changed_keys(old_dict, new_dict) {
            let key_class = match key.as_str() {
                "AcroForm" => {
                    let old_form = match old_dict.and_then(|d| d.get("AcroForm")) {
                        Some(v) => self.old.and_then(|o| o.resolve(v).ok()),
                        None => None,
                    };
                    let new_form = self.new.resolve_key_or_null(new_dict, "AcroForm")?;
                    let old_form = old_form.as_ref().and_then(Object::as_dict);
                    self.classify_acroform(old_form, &new_form)?.0
                },
                "DSS" => ChangeClass::Signature,
                "Perms" if old_dict.and_then(|d| d.get("Perms")).is_none() => {
                    ChangeClass::Signature
                },
                _ => ChangeClass::Content,
            };
            details.push(key);
            class = class.max(key_class);
        }
        Ok(Change::new(
            self.revision,
            r,
            class,
            format!("catalog entries changed: {}", details.join(", ")),
        ))
    }

    fn classify_acroform(
        &self,
        old: Option<&Dictionary>,
        new: &Object,
    ) -> Result<(ChangeClass, String)> {
        let Some(new_dict) = new.as_dict() else {
            return Ok((ChangeClass::Content, "AcroForm replaced".to_string()));
        };
        let mut class = ChangeClass::Structural;
        for key in changed_keys(old, Some(new_dict)) {
            let key_class = match key.as_str() {
                "Fields" => {
                    let old_fields = match old.and_then(|d| d.get("Fields")) {
                        Some(v) => self.old.and_then(|o| o.resolve(v).ok()),
                        None => None,
                    };
                    let new_fields = self.new.resolve_key_or_null(Some(new_dict), "Fields")?;
                    self.classify_added_refs(old_fields.as_ref(), &new_fields)?
                },
                "SigFlags" => ChangeClass::Signature,
                "NeedAppearances" | "DA" | "DR" => ChangeClass::FormFill,
                _ => ChangeClass::Content,
            };
            class = class.max(key_class);
        }
        Ok((class, "AcroForm changed".to_string()))
    }

    fn classify_page(&self, old: Option<&Object>, new: &Object) -> Result<(ChangeClass, String)> {
        let Some(old) = old else {
            return Ok((ChangeClass::Content, "page added".to_string()));
        };
        let mut class = ChangeClass::Structural;
        let mut keys = Vec::new();
        for key in changed_keys(old.as_dict(), new.as_dict()) {
            let key_class = if key == "Annots" {
                let old_annots = match old.get("Annots") {
                    Some(v) => self.old.and_then(|o| o.resolve(v).ok()),
                    None => None,
                };
                let new_annots = self.new.resolve_key_or_null(new.as_dict(), "Annots")?;
                self.classify_annots(old_annots.as_ref(), &new_annots)?
            } else {
                ChangeClass::Content
            };
            keys.push(key);
            class = class.max(key_class);
        }
        Ok((class, format!("page entries changed: {}", keys.join(", "))))
    }

    /// Classify an array of references that should only have grown by
    /// signature fields.
    fn classify_added_refs(&self, old: Option<&Object>, new: &Object) -> Result<ChangeClass> {
        let old_refs = ref_set(old);
        let new_refs = ref_set(Some(new));
        if !old_refs.is_subset(&new_refs) {
            return Ok(ChangeClass::Content);
        }
        let mut class = ChangeClass::Structural;
        for added in new_refs.difference(&old_refs) {
            let obj = self.new.get_object(*added)?;
            let added_class = if self.is_signature_field(&obj)? {
                ChangeClass::Signature
            } else {
                ChangeClass::Content
            };
            class = class.max(added_class);
        }
        Ok(class)
    }

    fn classify_annots(&self, old: Option<&Object>, new: &Object) -> Result<ChangeClass> {
        let old_refs = ref_set(old);
        let new_refs = ref_set(Some(new));
        let mut class = ChangeClass::Structural;
        for added in new_refs.difference(&old_refs) {
            let obj = self.new.get_object(*added)?;
            let added_class = if self.is_signature_field(&obj)? {
                ChangeClass::Signature
            } else if is_widget(&obj) {
                ChangeClass::Content
            } else {
                ChangeClass::Annotation
            };
            class = class.max(added_class);
        }
        for removed in old_refs.difference(&new_refs) {
            let removed_class = match self.old.map(|o| o.get_object(*removed)) {
                Some(Ok(obj)) if is_markup_annotation(&obj) => ChangeClass::Annotation,
                _ => ChangeClass::Content,
            };
            class = class.max(removed_class);
        }
        Ok(class)
    }

    fn is_acroform(&self, r: ObjectRef) -> Result<bool> {
        let catalog = self.new.catalog()?;
        Ok(catalog.get("AcroForm").and_then(Object::as_reference) == Some(r))
    }

    /// `/FT /Sig` on the object or inherited from its parents.
    fn is_signature_field(&self, obj: &Object) -> Result<bool> {
        inherits_signature_type(self.new, obj)
    }

    /// Same test against the previous revision, for an object's old definition.
    fn was_signature_field(&self, obj: &Object) -> Result<bool> {
        match self.old {
            Some(old) => inherits_signature_type(old, obj),
            None => Ok(false),
        }
    }

    /// Whether `r` is referenced from the appearance of a signature widget
    /// defined in this revision.
    fn is_signature_appearance(&self, r: ObjectRef) -> Result<bool> {
        self.appearance_owner(r, true)
    }

    fn is_field_appearance(&self, r: ObjectRef) -> Result<bool> {
        self.appearance_owner(r, false)
    }

    fn appearance_owner(&self, r: ObjectRef, signature_only: bool) -> Result<bool> {
        for id in self.new.object_ids() {
            let Ok(obj) = self.new.get_object(ObjectRef::new(id, 0)) else {
                continue;
            };
            if !is_widget(&obj) {
                continue;
            }
            if signature_only && !self.is_signature_field(&obj)? {
                continue;
            }
            let Some(ap) = obj.get("AP") else {
                continue;
            };
            let mut refs = ap.references();
            if let Object::Reference(_) = ap {
                refs.extend(self.new.resolve(ap)?.references());
            }
            for state in ["N", "D", "R"] {
                if let Some(sub) = self.new.resolve(ap)?.get(state) {
                    if sub.as_reference().is_some() {
                        refs.extend(self.new.resolve(sub)?.references());
                    }
                }
            }
            if refs.contains(&r) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn inherits_signature_type(file: &PdfFile, obj: &Object) -> Result<bool> {
    let mut current = obj.clone();
    for _ in 0..file.options().max_nesting {
        if let Some(ft) = current.get("FT").and_then(Object::as_name) {
            return Ok(ft == "Sig");
        }
        match current.get("Parent") {
            Some(parent) => current = file.resolve(parent)?,
            None => return Ok(false),
        }
    }
    Ok(false)
}

/// Keys a form-fill operation may touch on a field or widget.
const FIELD_VALUE_KEYS: &[&str] = &["V", "AS", "AP", "MK", "DV", "I"];

fn changed_keys(old: Option<&Dictionary>, new: Option<&Dictionary>) -> Vec<String> {
    let empty = Dictionary::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);
    let mut keys: Vec<String> = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(old.keys().filter(|k| !new.contains_key(*k)).cloned());
    keys
}

fn ref_set(obj: Option<&Object>) -> HashSet<ObjectRef> {
    obj.and_then(Object::as_array)
        .map(|items| items.iter().filter_map(Object::as_reference).collect())
        .unwrap_or_default()
}

fn is_signature_value(obj: &Object) -> bool {
    matches!(obj.dict_type(), Some("Sig") | Some("DocTimeStamp"))
        && obj.get("ByteRange").is_some()
}

fn is_widget(obj: &Object) -> bool {
    obj.get("Subtype").and_then(Object::as_name) == Some("Widget")
}

fn is_form_field(obj: &Object) -> bool {
    obj.as_dict()
        .is_some_and(|d| d.contains_key("FT") || (d.contains_key("T") && d.contains_key("Kids")))
}

fn is_markup_annotation(obj: &Object) -> bool {
    let annot_subtype = obj.get("Subtype").and_then(Object::as_name);
    let typed_annot = obj.dict_type() == Some("Annot") || obj.get("Rect").is_some();
    typed_annot && annot_subtype.is_some_and(|s| s != "Widget")
}

fn is_stream(obj: &Object) -> bool {
    matches!(obj, Object::Stream { .. })
}

fn is_form_xobject(obj: &Object) -> bool {
    is_stream(obj) && obj.get("Subtype").and_then(Object::as_name) == Some("Form")
}

trait ResolveOrNull {
    fn resolve_key_or_null(&self, dict: Option<&Dictionary>, key: &str) -> Result<Object>;
}

impl ResolveOrNull for PdfFile {
    fn resolve_key_or_null(&self, dict: Option<&Dictionary>, key: &str) -> Result<Object> {
        match dict {
            Some(d) => Ok(self.resolve_key(d, key)?.unwrap_or(Object::Null)),
            None => Ok(Object::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::object::{dict, name};

    #[test]
    fn test_changed_keys() {
        let old = dict([("A", Object::Integer(1)), ("B", Object::Integer(2))]);
        let new = dict([("A", Object::Integer(1)), ("B", Object::Integer(3)), ("C", Object::Null)]);
        let mut keys = changed_keys(Some(&old), Some(&new));
        keys.sort();
        assert_eq!(keys, vec!["B", "C"]);
        assert_eq!(changed_keys(Some(&new), Some(&old)).len(), 2);
    }

    #[test]
    fn test_object_predicates() {
        let widget =
            Object::Dictionary(dict([("Type", name("Annot")), ("Subtype", name("Widget"))]));
        let text = Object::Dictionary(dict([("Type", name("Annot")), ("Subtype", name("Text"))]));
        let sig = Object::Dictionary(dict([
            ("Type", name("Sig")),
            ("ByteRange", Object::Array(vec![])),
        ]));
        assert!(is_widget(&widget));
        assert!(!is_markup_annotation(&widget));
        assert!(is_markup_annotation(&text));
        assert!(is_signature_value(&sig));
        assert!(!is_signature_value(&text));
    }

    #[test]
    fn test_change_class_order() {
        assert!(ChangeClass::Structural < ChangeClass::Signature);
        assert!(ChangeClass::Annotation < ChangeClass::Content);
    }
}
