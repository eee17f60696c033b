use super::{ConfigError, CoordinatorError, ValidationError, WorkerError};

impl From<&'static str> for ValidationError {
    fn from(message: &'static str) -> Self {
        ValidationError::TestExpectation { message }
    }
}

impl From<String> for ValidationError {
    fn from(value: String) -> Self {
        ValidationError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ConfigError {
    fn from(message: &'static str) -> Self {
        ConfigError::TestExpectation { message }
    }
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        ConfigError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for CoordinatorError {
    fn from(message: &'static str) -> Self {
        CoordinatorError::TestExpectation { message }
    }
}

impl From<String> for CoordinatorError {
    fn from(value: String) -> Self {
        CoordinatorError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for WorkerError {
    fn from(message: &'static str) -> Self {
        WorkerError::TestExpectation { message }
    }
}

impl From<String> for WorkerError {
    fn from(value: String) -> Self {
        WorkerError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}
