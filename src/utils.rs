//! Small helpers shared across the pipeline.

use std::time::{SystemTime, UNIX_EPOCH};

/// Converts any iterable of displayable items into owned arguments.
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds an argument vector for an external tool.
///
/// ```rust
/// let args = media_pipeline::args!["-ss", 12, "-frames:v", 1];
/// assert_eq!(args, vec!["-ss", "12", "-frames:v", "1"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::utils::to_string_vec::<&dyn ::std::fmt::Display, _>([$(&$item as &dyn ::std::fmt::Display),*])
    };
}

/// Seconds since the unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Human readable size (KB, MB, GB).
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", size as u64, UNITS[unit])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_macro_mixes_types() {
        let screens = 12;
        let result = args!["-frames:v", screens, "-vf", "palettegen"];
        assert_eq!(result, vec!["-frames:v", "12", "-vf", "palettegen"]);
    }

    #[test]
    fn test_args_macro_empty() {
        let result: Vec<String> = args![];
        assert!(result.is_empty());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
