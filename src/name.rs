//! Droplet naming scheme
//!
//! Every droplet this crate creates is named `{fleet}-{template}-{suffix}`,
//! where the suffix is a random uniqueness token. Fleet and template names are
//! restricted to ASCII alphanumerics and `.`, so the `-` separator never
//! appears inside either component and a name can be attributed to its fleet
//! and template by plain prefix matching — with no in-memory state, which
//! keeps attribution stable across restarts.

use uuid::Uuid;

/// Separator between the fleet, template and uniqueness components.
const SEPARATOR: char = '-';

fn is_valid_component(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

/// Check whether a fleet name uses the permitted charset (A-Z, a-z, 0-9, `.`).
pub fn is_valid_fleet_name(name: &str) -> bool {
    is_valid_component(name)
}

/// Check whether a template name uses the permitted charset (A-Z, a-z, 0-9, `.`).
pub fn is_valid_template_name(name: &str) -> bool {
    is_valid_component(name)
}

/// Generate a droplet name for the given fleet and template.
pub fn generate(fleet: &str, template: &str) -> String {
    format!(
        "{fleet}{SEPARATOR}{template}{SEPARATOR}{}",
        Uuid::new_v4().simple()
    )
}

/// True iff `name` was generated for the given fleet (any template).
pub fn is_instance_of_fleet(name: &str, fleet: &str) -> bool {
    name.strip_prefix(fleet)
        .is_some_and(|rest| rest.starts_with(SEPARATOR))
}

/// True iff `name` was generated for exactly this fleet and template pair.
pub fn is_instance_of_template(name: &str, fleet: &str, template: &str) -> bool {
    let Some(rest) = name.strip_prefix(fleet) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix(SEPARATOR) else {
        return false;
    };
    let Some(suffix) = rest.strip_prefix(template) else {
        return false;
    };
    suffix.starts_with(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_fleet_name("do.cloud1"));
        assert!(is_valid_template_name("c.8core.build.neon"));
        assert!(!is_valid_fleet_name(""));
        assert!(!is_valid_fleet_name("my-fleet"));
        assert!(!is_valid_template_name("builder one"));
        assert!(!is_valid_template_name("builder_one"));
    }

    #[test]
    fn test_name_round_trip() {
        let name = generate("fleet1", "small.builder");
        assert!(is_instance_of_fleet(&name, "fleet1"));
        assert!(is_instance_of_template(&name, "fleet1", "small.builder"));
        assert!(!is_instance_of_template(&name, "fleet1", "big.builder"));
        assert!(!is_instance_of_fleet(&name, "fleet2"));
    }

    #[test]
    fn test_generated_names_are_unique() {
        let a = generate("f", "t");
        let b = generate("f", "t");
        assert_ne!(a, b);
    }

    #[test]
    fn test_prefix_names_do_not_collide() {
        // "ab" must not claim droplets belonging to fleet "abc".
        let name = generate("abc", "t");
        assert!(!is_instance_of_fleet(&name, "ab"));

        // Template "t" must not claim droplets of template "t.large".
        let name = generate("f", "t.large");
        assert!(is_instance_of_template(&name, "f", "t.large"));
        assert!(!is_instance_of_template(&name, "f", "t"));
    }

    #[test]
    fn test_foreign_names_do_not_match() {
        assert!(!is_instance_of_fleet("manually-added-host", "manual"));
        assert!(!is_instance_of_template("fleet1", "fleet1", "t"));
        assert!(!is_instance_of_template("fleet1-t", "fleet1", "t"));
    }
}
