//! Slug and filename sanitisation

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static SLUG_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").expect("valid regex"));
static NON_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^-\w.]").expect("valid regex"));

/// Convert a display name into a URL slug (`"My Script!"` -> `"my-script"`)
pub fn slugify(value: &str) -> String {
    let ascii: String = value.nfkd().filter(|c| c.is_ascii()).collect();
    let cleaned = NON_SLUG_CHARS.replace_all(&ascii, "").to_lowercase();
    let collapsed = SLUG_SEPARATORS.replace_all(cleaned.trim(), "-");
    collapsed.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// Pick the first free slug among `base`, `base-2`, `base-3`, ...
pub fn unique_slug<F>(value: &str, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut base = slugify(value);
    if base.is_empty() {
        base = "item".to_string();
    }
    if !is_taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Strip a user supplied name down to something safe to use as a path segment
pub fn get_valid_filename(name: &str) -> Result<String, String> {
    let spaced = name.trim().replace(' ', "_");
    let cleaned = NON_FILENAME_CHARS.replace_all(&spaced, "").to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(format!("Could not derive file name from '{}'", name));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Merge Files"), "merge-files");
        assert_eq!(slugify("  clean_dataset  "), "clean_dataset");
        assert_eq!(slugify("Café -- Crème!"), "cafe-creme");
        assert_eq!(slugify("--input"), "input");
    }

    #[test]
    fn test_unique_slug() {
        let taken = ["merge-files", "merge-files-2"];
        let slug = unique_slug("Merge files", |s| taken.contains(&s));
        assert_eq!(slug, "merge-files-3");
        assert_eq!(unique_slug("!!!", |_| false), "item");
    }

    #[test]
    fn test_get_valid_filename() {
        assert_eq!(get_valid_filename("john's portrait.jpg").unwrap(), "johns_portrait.jpg");
        assert_eq!(get_valid_filename("anonymous").unwrap(), "anonymous");
        assert!(get_valid_filename("..").is_err());
        assert!(get_valid_filename("  ").is_err());
    }
}
