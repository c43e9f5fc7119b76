// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Structured machine summaries.

use serde::Serialize;
use stepwise_ast::{MachineKind, Ty};

use crate::state::{LoweringResult, Scope, VarKind};

/// Complete machine description.
#[derive(Debug, Serialize)]
pub struct MachineDescription {
    pub name: String,
    pub kind: MachineKind,
    pub result: Ty,
    pub entry: u32,
    pub suspensions: usize,
    pub explicit_final: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDesc>,
    pub scopes: Vec<ScopeDesc>,
}

#[derive(Debug, Serialize)]
pub struct FieldDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Ty,
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ScopeDesc {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
    pub states: Vec<StateDesc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jump_cases: Vec<JumpCaseDesc>,
}

#[derive(Debug, Serialize)]
pub struct StateDesc {
    pub id: u32,
    pub group: u32,
    pub order: u32,
    pub leaves: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
    pub targets: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct JumpCaseDesc {
    pub key: i64,
    pub resume: u32,
    #[serde(rename = "continue")]
    pub continue_: u32,
}

fn kind_name(kind: VarKind) -> &'static str {
    match kind {
        VarKind::Declared => "declared",
        VarKind::Temp => "temp",
        VarKind::Awaiter => "awaiter",
        VarKind::Region => "region",
        VarKind::Final => "final",
        VarKind::Extern => "extern",
    }
}

fn scope_desc(result: &LoweringResult, scope: &Scope) -> ScopeDesc {
    ScopeDesc {
        id: scope.id.0,
        parent: scope.parent.map(|p| p.0),
        states: scope
            .states
            .iter()
            .map(|id| {
                let state = result.state(*id);
                StateDesc {
                    id: id.0,
                    group: state.group.0,
                    order: state.order.0,
                    leaves: state.leaves.len(),
                    transition: state.transition.as_ref().map(|t| t.name().to_string()),
                    targets: state
                        .transition
                        .as_ref()
                        .map(|t| t.targets().iter().map(|s| s.0).collect())
                        .unwrap_or_default(),
                }
            })
            .collect(),
        jump_cases: scope
            .jump_cases
            .iter()
            .map(|c| JumpCaseDesc {
                key: c.key,
                resume: c.resume.0,
                continue_: c.continue_.0,
            })
            .collect(),
    }
}

pub fn describe(result: &LoweringResult) -> MachineDescription {
    MachineDescription {
        name: result.name.clone(),
        kind: result.kind,
        result: result.result_ty.clone(),
        entry: result.entry.0,
        suspensions: result.suspension_count,
        explicit_final: result.final_result_has_explicit_assignment,
        fields: result
            .variables
            .values()
            .filter(|v| v.hoisted)
            .map(|v| FieldDesc {
                name: v.field.clone(),
                ty: v.var.ty.clone(),
                kind: kind_name(v.kind),
            })
            .collect(),
        scopes: result.scopes.iter().map(|s| scope_desc(result, s)).collect(),
    }
}

/// Serialize a description to JSON.
pub fn describe_json(result: &LoweringResult) -> String {
    serde_json::to_string_pretty(&describe(result))
        .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

#[cfg(test)]
mod tests {
    use stepwise_ast::{AsyncBlock, Node, Var};
    use stepwise_rt::HostEnv;

    use super::*;
    use crate::lower::lower;
    use crate::TransformOptions;

    #[test]
    fn json_carries_scopes_and_jump_cases() {
        let f = Var::new("f", Ty::future(Ty::Int));
        let block = AsyncBlock {
            name: "json".into(),
            kind: MachineKind::Async,
            result_ty: Ty::Int,
            vars: vec![],
            body: vec![Node::await_(Node::var(&f))],
        };
        let r = lower(
            &block,
            std::slice::from_ref(&f),
            &HostEnv::empty(),
            &TransformOptions::default(),
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&describe_json(&r)).unwrap();
        assert_eq!(json["name"], "json");
        assert_eq!(json["kind"], "Async");
        assert_eq!(json["scopes"][0]["states"].as_array().unwrap().len(), 3);
        assert_eq!(json["scopes"][0]["jump_cases"][0]["continue"], 1);
        assert!(json["fields"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f["kind"] == "awaiter"));
    }
}
