use common::domain::{DomainError, DomainResult};

/// Validate an MQTT subscription filter such as `sensors/+/data` or `sensors/#`.
///
/// Rules:
/// - the filter must not be empty or contain NUL
/// - `+` must occupy a whole level
/// - `#` must occupy a whole level and be the last one
///
/// # Examples
/// ```
/// use ingest_worker::mqtt::validate_topic_filter;
///
/// assert!(validate_topic_filter("Hotpants/data").is_ok());
/// assert!(validate_topic_filter("Hotpants/#").is_ok());
/// assert!(validate_topic_filter("Hot#/data").is_err());
/// ```
pub fn validate_topic_filter(filter: &str) -> DomainResult<()> {
    if filter.is_empty() {
        return Err(DomainError::InvalidTopicFilter(
            "Topic filter cannot be empty".to_string(),
        ));
    }

    if filter.contains('\0') {
        return Err(DomainError::InvalidTopicFilter(format!(
            "Topic filter '{}' contains a NUL character",
            filter.escape_debug()
        )));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != "+" {
            return Err(DomainError::InvalidTopicFilter(format!(
                "Invalid topic filter '{}': '+' must occupy an entire level",
                filter
            )));
        }

        if level.contains('#') && (*level != "#" || index != last) {
            return Err(DomainError::InvalidTopicFilter(format!(
                "Invalid topic filter '{}': '#' must be the last level on its own",
                filter
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_topic() {
        assert!(validate_topic_filter("Hotpants/data").is_ok());
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(validate_topic_filter("sensors/+/temperature").is_ok());
        assert!(validate_topic_filter("+").is_ok());
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(validate_topic_filter("sensors/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
    }

    #[test]
    fn test_empty_filter() {
        assert!(validate_topic_filter("").is_err());
    }

    #[test]
    fn test_partial_level_plus() {
        assert!(validate_topic_filter("sensors/temp+/data").is_err());
    }

    #[test]
    fn test_hash_not_last() {
        assert!(validate_topic_filter("sensors/#/data").is_err());
    }

    #[test]
    fn test_partial_level_hash() {
        assert!(validate_topic_filter("sensors/data#").is_err());
    }

    #[test]
    fn test_nul_character() {
        assert!(validate_topic_filter("sensors/\0").is_err());
    }

    #[test]
    fn test_empty_levels_are_allowed() {
        assert!(validate_topic_filter("sensors//data").is_ok());
        assert!(validate_topic_filter("/data").is_ok());
    }
}
