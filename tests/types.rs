// ABOUTME: Integration tests for type-safe identifiers and validated types.
// ABOUTME: Tests unit name validation and identifier behavior.

use deckhand::types::*;

mod unit_name_tests {
    use super::*;

    #[test]
    fn accepts_simple_name() {
        let name = UnitName::new("api").unwrap();
        assert_eq!(name.as_str(), "api");
    }

    #[test]
    fn accepts_hyphens_and_digits() {
        assert!(UnitName::new("web-frontend-2").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(UnitName::new(""), Err(UnitNameError::Empty)));
    }

    #[test]
    fn rejects_uppercase() {
        assert!(matches!(
            UnitName::new("Api"),
            Err(UnitNameError::NotLowercase)
        ));
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(matches!(
            UnitName::new("api;rm"),
            Err(UnitNameError::InvalidChar(';'))
        ));
        assert!(matches!(
            UnitName::new("api$x"),
            Err(UnitNameError::InvalidChar('$'))
        ));
    }

    #[test]
    fn rejects_leading_and_trailing_hyphen() {
        assert!(matches!(
            UnitName::new("-api"),
            Err(UnitNameError::StartsWithHyphen)
        ));
        assert!(matches!(
            UnitName::new("api-"),
            Err(UnitNameError::EndsWithHyphen)
        ));
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(64);
        assert!(matches!(UnitName::new(&long), Err(UnitNameError::TooLong)));
    }
}

mod id_tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_compare_by_value() {
        assert_eq!(ProjectId::new("api"), ProjectId::new("api"));
        assert_ne!(ProjectId::new("api"), ProjectId::new("web"));
    }

    #[test]
    fn ids_are_hashable() {
        let mut set = HashSet::new();
        set.insert(HostId::new("web1"));
        set.insert(HostId::new("web1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display_is_raw_value() {
        assert_eq!(DeploymentId::new("d-1").to_string(), "d-1");
    }
}
