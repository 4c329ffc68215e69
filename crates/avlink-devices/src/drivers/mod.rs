/*!
 * Built-in vendor profiles.
 *
 * Each module exposes a catalog `NAME` and a `profile()` constructor.
 */
use avlink_engine::{DriverProfile, Result};

pub mod aten;
pub mod bose;
pub mod excell;
pub mod geston;
pub mod kramer;
pub mod qtex;
pub mod symetrix;
pub mod visca;

/// Profile constructor
pub type ProfileFn = fn() -> Result<DriverProfile>;

/// Every built-in profile, by catalog name
pub const BUILTIN: &[(&str, ProfileFn)] = &[
    (aten::NAME, aten::profile),
    (bose::NAME, bose::profile),
    (excell::NAME, excell::profile),
    (geston::NAME, geston::profile),
    (kramer::NAME, kramer::profile),
    (qtex::NAME, qtex::profile),
    (symetrix::NAME, symetrix::profile),
    (visca::NAME, visca::profile),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_profiles_build() {
        for (name, build) in BUILTIN {
            let profile = build().unwrap_or_else(|e| panic!("{} failed to build: {}", name, e));
            assert!(!profile.commands.is_empty(), "{} has no commands", name);
            assert!(!profile.responses.is_empty(), "{} has no response rules", name);
        }
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let names: HashSet<_> = BUILTIN.iter().map(|(name, _)| *name).collect();
        assert_eq!(names.len(), BUILTIN.len());
    }
}
