use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{Result, TrackerClient, TrackerError};
use crate::types::{TrackerComment, TrackerIssue};

/// GraphQL client for a Linear-style tracker API.
///
/// Authenticates with a raw API key in the `Authorization` header; every
/// operation is one POST to the configured endpoint.
pub struct LinearClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl LinearClient {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Execute one GraphQL operation and return the `data` object.
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", &self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(TrackerError::Api(errors[0].to_string()));
            }
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| TrackerError::Api("response without data".into()))
    }
}

#[async_trait]
impl TrackerClient for LinearClient {
    async fn list_assigned_issues(
        &self,
        team_id: &str,
        assignee_id: &str,
    ) -> Result<Vec<TrackerIssue>> {
        let data = self
            .graphql(
                "query AssignedIssues($team: ID!, $assignee: ID!) {
                   issues(filter: {
                     team: { id: { eq: $team } },
                     assignee: { id: { eq: $assignee } }
                   }) {
                     nodes { id identifier title description }
                   }
                 }",
                json!({ "team": team_id, "assignee": assignee_id }),
            )
            .await?;

        let nodes = data
            .pointer("/issues/nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| TrackerError::Api("malformed issues response".into()))?;

        Ok(nodes
            .iter()
            .map(|node| TrackerIssue {
                id: str_field(node, "id"),
                identifier: str_field(node, "identifier"),
                title: str_field(node, "title"),
                description: str_field(node, "description"),
            })
            .collect())
    }

    async fn list_comments(&self, issue_id: &str) -> Result<Vec<TrackerComment>> {
        let data = self
            .graphql(
                "query IssueComments($id: String!) {
                   issue(id: $id) {
                     comments {
                       nodes { id body createdAt user { id } }
                     }
                   }
                 }",
                json!({ "id": issue_id }),
            )
            .await?;

        let nodes = data
            .pointer("/issue/comments/nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| TrackerError::Api("malformed comments response".into()))?;

        let mut comments: Vec<TrackerComment> = nodes
            .iter()
            .map(|node| TrackerComment {
                id: str_field(node, "id"),
                body: str_field(node, "body"),
                author_id: node
                    .pointer("/user/id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                created_at: parse_timestamp(node.get("createdAt")),
            })
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn post_comment(&self, issue_id: &str, body: &str) -> Result<()> {
        let data = self
            .graphql(
                "mutation PostComment($issueId: String!, $body: String!) {
                   commentCreate(input: { issueId: $issueId, body: $body }) { success }
                 }",
                json!({ "issueId": issue_id, "body": body }),
            )
            .await?;

        match data.pointer("/commentCreate/success").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            _ => Err(TrackerError::Api("comment creation rejected".into())),
        }
    }

    async fn set_issue_state(&self, issue_id: &str, state_name: &str) -> Result<()> {
        // Resolve the workflow state id by name, scoped to the issue's team.
        let data = self
            .graphql(
                "query IssueStates($id: String!) {
                   issue(id: $id) {
                     team { states { nodes { id name } } }
                   }
                 }",
                json!({ "id": issue_id }),
            )
            .await?;

        let states = data
            .pointer("/issue/team/states/nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| TrackerError::Api("malformed states response".into()))?;
        let state_id = states
            .iter()
            .find(|node| {
                node.get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.eq_ignore_ascii_case(state_name))
            })
            .map(|node| str_field(node, "id"))
            .ok_or_else(|| TrackerError::Api(format!("no workflow state named {state_name}")))?;

        let data = self
            .graphql(
                "mutation MoveIssue($id: String!, $stateId: String!) {
                   issueUpdate(id: $id, input: { stateId: $stateId }) { success }
                 }",
                json!({ "id": issue_id, "stateId": state_id }),
            )
            .await?;

        match data.pointer("/issueUpdate/success").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            _ => Err(TrackerError::Api("issue state update rejected".into())),
        }
    }
}

fn str_field(node: &Value, key: &str) -> String {
    node.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
