use serde::{Deserialize, Serialize};

/// One (input, expected output) pair of a problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i32,
    /// Position within the problem; test cases are judged in ascending order.
    #[serde(default = "default_order")]
    pub order: i32,
    #[serde(default)]
    pub input: String,
    pub expected_output: String,
    /// Hidden test cases are not shown to submitters.
    #[serde(default)]
    pub hidden: bool,
}

fn default_order() -> i32 {
    1
}

/// A problem as read by the judge. The judge never mutates problems.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i32,
    #[serde(default)]
    pub short_code: String,
    #[serde(default)]
    pub name: String,
    /// Time limit per test case in milliseconds.
    pub time_limit_ms: u32,
    /// Memory limit per test case in kilobytes.
    pub memory_limit_kb: u32,
    #[serde(default, rename = "test_case")]
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    /// Parse a problem from its TOML representation.
    ///
    /// ```toml
    /// id = 1
    /// short_code = "ECHO"
    /// time_limit_ms = 2000
    /// memory_limit_kb = 262144
    ///
    /// [[test_case]]
    /// id = 1
    /// input = "hello\n"
    /// expected_output = "hello\n"
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Test cases sorted by `order`, ties broken by id.
    pub fn ordered_test_cases(&self) -> Vec<TestCase> {
        let mut test_cases = self.test_cases.clone();
        test_cases.sort_by_key(|tc| (tc.order, tc.id));
        test_cases
    }

    pub fn has_test_cases(&self) -> bool {
        !self.test_cases.is_empty()
    }
}
