/// Parsed `key=value` pairs handed to a transport's init by the host
/// config parser. Keys are matched case-insensitively; order is kept so
/// transports can walk the pairs the way they were written.
#[derive(Debug, Clone, Default)]
pub struct Options(Vec<(String, String)>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, val: &str) {
        self.0.push((key.to_owned(), val.to_owned()));
    }

    pub fn set(mut self, key: &str, val: &str) -> Self {
        self.push(key, val);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Options {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
