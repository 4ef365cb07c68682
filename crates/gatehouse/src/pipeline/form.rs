/// Decoded `application/x-www-form-urlencoded` fields, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, String)>,
}

impl FormData {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_wins_and_all_are_kept() {
        let form = FormData::new(vec![
            ("tag".into(), "a".into()),
            ("name".into(), "ada".into()),
            ("tag".into(), "b".into()),
        ]);
        assert_eq!(form.get("tag"), Some("a"));
        assert_eq!(form.get_all("tag").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(form.get("missing"), None);
        assert_eq!(form.len(), 3);
    }
}
