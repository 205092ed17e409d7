//! Local identity resolution.
//!
//! The hub addresses people by display name, and the same person can show up
//! under a login name, a full name, or a prefixed form ("Eng. Sara"). The
//! resolver decides whether a name refers to the local user so that every
//! message can be filed under the other participant.

/// Normalise a name for comparison: trimmed and lowercased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    display_name: Option<String>,
    login_name: Option<String>,
    hub_name: Option<String>,
}

impl IdentityResolver {
    pub fn new(display_name: Option<&str>, login_name: Option<&str>) -> Self {
        Self {
            display_name: display_name.and_then(clean),
            login_name: login_name.and_then(clean),
            hub_name: None,
        }
    }

    pub fn set_local_names(&mut self, display_name: Option<&str>, login_name: Option<&str>) {
        self.display_name = display_name.and_then(clean);
        self.login_name = login_name.and_then(clean);
    }

    /// Record the name last used for hub registration.
    pub fn set_hub_name(&mut self, name: &str) {
        self.hub_name = clean(name);
    }

    pub fn hub_name(&self) -> Option<&str> {
        self.hub_name.as_deref()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Whether `name` refers to the local user.
    ///
    /// Matches on equality with any alias, or when either string contains the
    /// other. The containment rule catches title prefixes and suffixes but can
    /// also match a short name inside an unrelated longer one.
    pub fn is_self(&self, name: &str) -> bool {
        let candidate = normalize_name(name);
        if candidate.is_empty() {
            return false;
        }

        self.aliases().any(|alias| {
            let alias = normalize_name(alias);
            alias == candidate || alias.contains(&candidate) || candidate.contains(&alias)
        })
    }

    /// Resolve which side of a two-party message is the partner.
    ///
    /// Returns `(is_me, partner)`.
    pub fn partner_for<'a>(&self, sender: &'a str, recipient: &'a str) -> (bool, &'a str) {
        let is_me = self.is_self(sender);
        let partner = if is_me { recipient } else { sender };
        (is_me, partner)
    }

    fn aliases(&self) -> impl Iterator<Item = &str> {
        [&self.display_name, &self.login_name, &self.hub_name]
            .into_iter()
            .filter_map(|alias| alias.as_deref())
    }
}

fn clean(name: &str) -> Option<String> {
    let trimmed = name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
