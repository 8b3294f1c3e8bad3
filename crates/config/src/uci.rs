//! OpenWrt UCI configuration parsing.
//!
//! Understands the subset used by package config files:
//!
//! ```text
//! config fileshare 'main'
//!     option port '3000'
//!     option password 'secret'
//!     list allowed_hosts 'nas.lan'
//! ```
//!
//! Section headers and comments are skipped; all sections are merged.

use tracing::trace;

use crate::settings::Setting;

/// Parse UCI text into raw settings
pub(crate) fn parse(content: &str) -> Vec<Setting> {
    let mut settings = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => continue,
        };

        let append = match keyword {
            "option" => false,
            "list" => true,
            _ => continue,
        };

        let Some((key, raw_value)) = rest.split_once(char::is_whitespace) else {
            trace!(line = line_no, "UCI option without value skipped");
            continue;
        };

        let setting = Setting::new(key, unquote(raw_value.trim())).at_line(line_no);
        settings.push(if append { setting.appending() } else { setting });
    }

    trace!(count = settings.len(), "Parsed UCI settings");
    settings
}

/// Strip one pair of matching single or double quotes
fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    // Trailing comment on an unquoted value
    value.split('#').next().unwrap_or(value).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# fileshare settings
config fileshare 'main'
	option port '3000'
	option password "p@ss word"
	option allowed_hosts 'nas.lan,192.168.1.'
	option enable_https '1'
	option https_port 3443
	list allowed_hosts 'media.lan'
	option broken
"#;

    #[test]
    fn test_parse_sample() {
        let settings = parse(SAMPLE);
        let keys: Vec<&str> = settings.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "port",
                "password",
                "allowed_hosts",
                "enable_https",
                "https_port",
                "allowed_hosts"
            ]
        );
        assert_eq!(settings[1].value, "p@ss word");
        assert_eq!(settings[4].value, "3443");
        assert!(settings[5].append);
        assert_eq!(settings[0].line, Some(4));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'a'"), "a");
        assert_eq!(unquote("\"b\""), "b");
        assert_eq!(unquote("c # note"), "c");
        assert_eq!(unquote("'"), "'");
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("config fileshare\n").is_empty());
    }
}
