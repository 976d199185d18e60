use crate::Value;
use serde::{Deserialize, Serialize};

/// Name of the parameter that grants access to every job variable
pub const ACCESS_ALL_VARIABLES: &str = "*";

/// How mandatory a parameter is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Required,
    Optional,
    /// Not checked at all, the runner reads it if present
    Free,
}

/// Semantic type expected for a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Integer,
    Long,
    Double,
    Boolean,
    /// Milliseconds, or an ISO-8601 duration such as `PT5M`
    Duration,
    Map,
    List,
    /// Reference to a stored file
    File,
    Object,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::String => "String",
            ParamType::Integer => "Integer",
            ParamType::Long => "Long",
            ParamType::Double => "Double",
            ParamType::Boolean => "Boolean",
            ParamType::Duration => "Duration",
            ParamType::Map => "Map",
            ParamType::List => "List",
            ParamType::File => "File",
            ParamType::Object => "Object",
        }
    }
}

/// Makes a parameter applicable only when another input holds one of the values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub property: String,
    pub one_of: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub code: String,
    pub label: String,
}

/// Display group. Two groups are the same when their ids are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub label: String,
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Group {
    pub fn from_label(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: label.to_lowercase().replace(' ', "_"),
            label,
        }
    }
}

/// One declared input or output of a runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerParameter {
    pub name: String,
    pub label: String,
    pub param_type: ParamType,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
    #[serde(default)]
    pub visible_in_template: bool,
}

impl RunnerParameter {
    pub fn new(name: impl Into<String>, param_type: ParamType, level: Level) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            param_type,
            level,
            default_value: None,
            explanation: String::new(),
            condition: None,
            choices: Vec::new(),
            group: None,
            visible_in_template: false,
        }
    }

    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, param_type, Level::Required)
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, param_type, Level::Optional)
    }

    pub fn free(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, param_type, Level::Free)
    }

    /// The runner reads or writes any variable
    pub fn access_all_variables(explanation: impl Into<String>) -> Self {
        Self::optional(ACCESS_ALL_VARIABLES, ParamType::Object)
            .with_label("Access All Variables")
            .with_explanation(explanation)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_condition<I, S>(mut self, property: impl Into<String>, one_of: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition = Some(Condition {
            property: property.into(),
            one_of: one_of.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_choice(mut self, code: impl Into<String>, label: impl Into<String>) -> Self {
        self.choices.push(Choice {
            code: code.into(),
            label: label.into(),
        });
        self
    }

    pub fn with_group(mut self, label: impl Into<String>) -> Self {
        self.group = Some(Group::from_label(label));
        self
    }

    pub fn visible_in_template(mut self) -> Self {
        self.visible_in_template = true;
        self
    }

    pub fn is_access_all_variables(&self) -> bool {
        self.name == ACCESS_ALL_VARIABLES
    }
}

/// Data type able to describe itself as a list of parameters.
///
/// Connector input and output types implement it so their contract does not
/// need to be written twice.
pub trait ContractSchema {
    fn parameters() -> Vec<RunnerParameter>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_identity_is_the_id() {
        let a = Group::from_label("Connection Settings");
        let b = Group {
            id: "connection_settings".to_string(),
            label: "Other label".to_string(),
        };
        assert_eq!(a.id, "connection_settings");
        assert_eq!(a, b);
    }

    #[test]
    fn wildcard_parameter() {
        let param = RunnerParameter::access_all_variables("reads everything");
        assert!(param.is_access_all_variables());
        assert_eq!(param.level, Level::Optional);
    }
}
