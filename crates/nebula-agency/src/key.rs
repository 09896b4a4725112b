/// A path into the agency tree, kept internally as an ordered sequence of
/// segments. Only joined into the dotted wire form at the network boundary
/// (see [`AgencyKey::wire`]), so a segment that itself contains a literal
/// `.` is never mistaken for a path separator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AgencyKey(Vec<String>);

impl AgencyKey {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub(crate) fn wire(&self) -> String {
        self.0.join(".")
    }
}

impl From<&str> for AgencyKey {
    fn from(raw: &str) -> Self {
        Self(raw.split('.').map(str::to_string).collect())
    }
}

impl From<String> for AgencyKey {
    fn from(raw: String) -> Self {
        AgencyKey::from(raw.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_dot_joined() {
        let key = AgencyKey::new(["arango", "go-driver", "test"]);
        assert_eq!(key.wire(), "arango.go-driver.test");
    }

    #[test]
    fn segments_survive_a_dot_in_a_single_component() {
        let key = AgencyKey::new(["a.b", "c"]);
        assert_eq!(key.segments(), ["a.b", "c"]);
    }
}
