//! Storage-key sanitization for task ids.

/// Characters forbidden in a storage key: any of `\/:*?"<>|` in a
/// `taskId` is replaced with `_` when used as a storage key. Narrower
/// than `url_model::sanitize::sanitize_filename_for_linux`'s forbidden set
/// (which also folds whitespace and trims dots); task ids are opaque
/// client-chosen strings, so only the documented character class is touched.
const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub fn sanitize_task_id_for_storage_key(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_forbidden_characters() {
        assert_eq!(
            sanitize_task_id_for_storage_key(r#"a/b:c*d?e"f<g>h|i"#),
            "a_b_c_d_e_f_g_h_i"
        );
    }

    #[test]
    fn leaves_ordinary_ids_untouched() {
        assert_eq!(sanitize_task_id_for_storage_key("task-123"), "task-123");
    }
}
