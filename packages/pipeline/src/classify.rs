//! Rule-based classification of failed jobs.

use reading_core::{FailureClass, ReaderName};

/// A case-insensitive substring rule, optionally scoped to one reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRule {
    pub pattern: String,
    pub class: FailureClass,
    pub reader: Option<ReaderName>,
}

impl ClassifierRule {
    pub fn new(pattern: impl Into<String>, class: FailureClass) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
            class,
            reader: None,
        }
    }

    /// Restrict the rule to jobs of `reader`.
    pub fn for_reader(mut self, reader: ReaderName) -> Self {
        self.reader = Some(reader);
        self
    }

    fn applies(&self, reader: ReaderName, haystack: &str) -> bool {
        self.reader.is_none_or(|r| r == reader) && haystack.contains(&self.pattern)
    }
}

/// Ordered rule set; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    rules: Vec<ClassifierRule>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        use FailureClass::*;

        let rules = vec![
            ClassifierRule::new("polling exhausted", PollingExhausted),
            ClassifierRule::new("submission rejected", Permanent),
            // Memory limits
            ClassifierRule::new("outofmemoryerror", ResourceExhausted),
            ClassifierRule::new("out of memory", ResourceExhausted),
            ClassifierRule::new("memoryerror", ResourceExhausted),
            ClassifierRule::new("cannot allocate memory", ResourceExhausted),
            ClassifierRule::new("oom-kill", ResourceExhausted),
            ClassifierRule::new("heap exhausted", ResourceExhausted),
            // Reader-specific crashes
            ClassifierRule::new("exception in thread", ReaderCrash).for_reader(ReaderName::Reach),
            ClassifierRule::new("exception in thread", ReaderCrash).for_reader(ReaderName::Eidos),
            ClassifierRule::new("debugger invoked on", ReaderCrash).for_reader(ReaderName::Sparser),
            ClassifierRule::new("debugger invoked on", ReaderCrash).for_reader(ReaderName::Trips),
            ClassifierRule::new("mti processing failed", ReaderCrash).for_reader(ReaderName::Mti),
            // Generic crashes
            ClassifierRule::new("traceback (most recent call last)", ReaderCrash),
            ClassifierRule::new("segmentation fault", ReaderCrash),
            ClassifierRule::new("core dumped", ReaderCrash),
            ClassifierRule::new("panicked at", ReaderCrash),
        ];
        Self { rules }
    }
}

impl FailureClassifier {
    /// A classifier with no rules; everything is unclassified.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, rule: ClassifierRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Classify a job from its recorded reason and its log lines.
    pub fn classify(&self, reader: ReaderName, reason: Option<&str>, logs: &[String]) -> FailureClass {
        let mut haystack = reason.unwrap_or_default().to_lowercase();
        for line in logs {
            haystack.push('\n');
            haystack.push_str(&line.to_lowercase());
        }

        self.rules
            .iter()
            .find(|rule| rule.applies(reader, &haystack))
            .map(|rule| rule.class)
            .unwrap_or(FailureClass::Unclassified)
    }
}
