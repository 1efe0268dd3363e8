use crate::{error::CoreError, sentence::Sentence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rule {
    deny: bool,
    /// 5-character address pattern, `*` matches any byte.
    pattern: [u8; 5],
}

impl Rule {
    fn matches(&self, address: &[u8]) -> bool {
        address.len() == 5
            && self.pattern.iter().zip(address).all(|(p, b)| *p == b'*' || p.eq_ignore_ascii_case(b))
    }
}

/// Ordered allow/deny rules over the sentence address field.
///
/// Rule syntax: `+GPGGA:-GP***`. A sign, then a 5-character pattern with
/// `*` wildcards, rules separated by `:`. The first matching rule decides.
/// Sentences matching no rule are accepted, unless the filter contains any
/// allow rule, in which case it acts as an allowlist and they are denied.
/// Sentences without an address field always pass.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    rules: Vec<Rule>,
    allowlist: bool,
}

impl Filter {
    pub fn parse(spec: &str) -> Result<Self, CoreError> {
        let mut rules = Vec::new();
        for part in spec.split(':').filter(|p| !p.is_empty()) {
            let bytes = part.as_bytes();
            let deny = match bytes[0] {
                b'+' => false,
                b'-' => true,
                _ => return Err(CoreError::BadFilterRule(part.to_owned())),
            };
            let pat = &bytes[1..];
            if pat.len() != 5 || !pat.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'*') {
                return Err(CoreError::BadFilterRule(part.to_owned()));
            }
            let mut pattern = [0u8; 5];
            pattern.copy_from_slice(pat);
            rules.push(Rule { deny, pattern });
        }
        let allowlist = rules.iter().any(|r| !r.deny);
        Ok(Self { rules, allowlist })
    }

    pub fn pass(&self, sentence: &Sentence) -> bool {
        let Some(address) = sentence.address() else {
            return true;
        };
        for rule in &self.rules {
            if rule.matches(address) {
                return !rule.deny;
            }
        }
        !self.allowlist
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
