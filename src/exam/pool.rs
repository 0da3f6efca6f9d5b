//! Candidate pool construction
//!
//! The pool for a course is every active exam-candidate item whose
//! module tag is either linked to the course or an orphan. Orphan tags
//! match no real module in the catalog at all; they are unioned in so
//! legacy and unlinked content is not silently dropped from exams.

use std::collections::HashSet;

use crate::db::items::ItemRow;

/// Minimal item projection the assembler samples over
#[derive(Debug, Clone)]
pub struct PoolItem {
    pub id: String,
    pub module_tag: String,
    pub difficulty: i64,
    pub tags: Vec<String>,
}

impl From<&ItemRow> for PoolItem {
    fn from(item: &ItemRow) -> Self {
        Self {
            id: item.id.clone(),
            module_tag: item.module_tag.clone(),
            difficulty: item.difficulty,
            tags: item.tags.clone(),
        }
    }
}

/// Filter exam candidates down to the pool for one course.
///
/// `candidates` must already be restricted to active, exam-candidate
/// items in the right locale; this function only applies the module-tag
/// rule. Pure and idempotent over current store contents.
pub fn build_pool(
    candidates: &[ItemRow],
    linked_tags: &HashSet<String>,
    catalog_tags: &HashSet<String>,
) -> Vec<PoolItem> {
    candidates
        .iter()
        .filter(|item| {
            linked_tags.contains(&item.module_tag) || !catalog_tags.contains(&item.module_tag)
        })
        .map(PoolItem::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, module_tag: &str) -> ItemRow {
        ItemRow {
            id: id.to_string(),
            module_tag: module_tag.to_string(),
            locale: "en".to_string(),
            question: "Q".to_string(),
            choices_json: "[\"A\",\"B\"]".to_string(),
            correct_index: 0,
            difficulty: 3,
            active: true,
            exam_candidate: true,
            status: "published".to_string(),
            version: 1,
            content_hash: id.to_string(),
            created_by: None,
            created_at: String::new(),
            updated_at: String::new(),
            tags: vec![],
        }
    }

    fn set(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_linked_tags_included() {
        let candidates = vec![item("i1", "safety"), item("i2", "ops")];
        let pool = build_pool(&candidates, &set(&["safety"]), &set(&["safety", "ops"]));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, "i1");
    }

    #[test]
    fn test_orphan_tags_unioned_in() {
        // "legacy" matches no real module anywhere, so its items stay eligible
        let candidates = vec![item("i1", "safety"), item("i2", "legacy")];
        let pool = build_pool(&candidates, &set(&["safety"]), &set(&["safety", "ops"]));
        let ids: Vec<_> = pool.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["i1", "i2"]);
    }

    #[test]
    fn test_other_course_module_excluded() {
        // "ops" is a real module, just not linked to this course: excluded,
        // not an orphan
        let candidates = vec![item("i1", "ops")];
        let pool = build_pool(&candidates, &set(&["safety"]), &set(&["safety", "ops"]));
        assert!(pool.is_empty());
    }
}
