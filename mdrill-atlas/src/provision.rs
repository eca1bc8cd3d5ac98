//! Project, user and access-list provisioning.
//!
//! All helpers are idempotent: "already exists" answers are resolved by
//! looking up or updating the existing resource.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::client::AtlasClient;
use crate::error::{AtlasError, codes};

/// Role granted to the database user the workloads connect as.
const ADMIN_ROLE: &str = "atlasAdmin";

/// Find an organization by exact name.
pub fn get_organization_by_name(client: &AtlasClient, name: &str) -> Result<Value, AtlasError> {
    let response = client.get(&format!("orgs?name={}", urlencoding::encode(name)))?;
    let org = results(&response)
        .iter()
        .find(|org| org.get("name").and_then(Value::as_str) == Some(name))
        .cloned()
        .ok_or_else(|| AtlasError::NotFound {
            what: "organization",
            name: name.to_string(),
        })?;
    debug!("Organization details: {}", org);
    Ok(org)
}

/// Look up a project by name.
///
/// When several projects share the name, the first project of the
/// organization is used.
pub fn get_project(client: &AtlasClient, project_name: &str, organization_id: &str) -> Result<Value, AtlasError> {
    let project = match client.get(&format!("groups/byName/{}", urlencoding::encode(project_name))) {
        Ok(project) => project,
        Err(err) if err.is_code(codes::MULTIPLE_GROUPS) => {
            warn!("There are many projects named {:?}", project_name);
            let listing = client.get(&format!("orgs/{organization_id}/groups"))?;
            results(&listing)
                .first()
                .cloned()
                .ok_or_else(|| AtlasError::NotFound {
                    what: "project",
                    name: project_name.to_string(),
                })?
        }
        Err(err) => return Err(err),
    };
    debug!("Project details: {}", project);
    Ok(project)
}

/// Create the project if needed and return it.
pub fn ensure_project(client: &AtlasClient, project_name: &str, organization_id: &str) -> Result<Value, AtlasError> {
    let body = json!({"name": project_name, "orgId": organization_id});
    match client.post("groups", &body) {
        Ok(project) => {
            debug!("Project {:?} successfully created", project_name);
            Ok(project)
        }
        Err(err) if err.is_code(codes::GROUP_ALREADY_EXISTS) => {
            debug!("Project {:?} already exists", project_name);
            get_project(client, project_name, organization_id)
        }
        Err(err) => Err(err),
    }
}

/// Create (or update the password and roles of) an admin database user.
pub fn ensure_admin_user(
    client: &AtlasClient,
    project_id: &str,
    username: &str,
    password: &str,
) -> Result<Value, AtlasError> {
    let mut details = json!({
        "groupId": project_id,
        "databaseName": "admin",
        "roles": [{"databaseName": "admin", "roleName": ADMIN_ROLE}],
        "username": username,
        "password": password,
    });

    let user = match client.post(&format!("groups/{project_id}/databaseUsers"), &details) {
        Ok(user) => {
            debug!("User {:?} successfully created", username);
            user
        }
        Err(err) if err.is_code(codes::USER_ALREADY_EXISTS) => {
            debug!("User {:?} already exists", username);
            if let Some(fields) = details.as_object_mut() {
                fields.remove("username");
            }
            client.patch(
                &format!(
                    "groups/{project_id}/databaseUsers/admin/{}",
                    urlencoding::encode(username)
                ),
                &details,
            )?
        }
        Err(err) => return Err(err),
    };
    debug!("User details: {}", redact_password(&user));
    Ok(user)
}

/// Allow connections from any address to the project.
pub fn ensure_access_from_anywhere(client: &AtlasClient, project_id: &str) -> Result<Value, AtlasError> {
    let entries = json!([{"cidrBlock": "0.0.0.0/0"}]);
    let response = client.post(&format!("groups/{project_id}/accessList"), &entries)?;
    debug!("Project access list: {}", response);
    Ok(response)
}

fn results(response: &Value) -> &[Value] {
    response
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn redact_password(user: &Value) -> Value {
    let mut user = user.clone();
    if let Some(password) = user.get_mut("password") {
        *password = Value::String("<redacted>".to_string());
    }
    user
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_handles_missing_list() {
        assert!(results(&json!({})).is_empty());
        assert_eq!(results(&json!({"results": [1, 2]})).len(), 2);
    }

    #[test]
    fn password_is_redacted() {
        let user = redact_password(&json!({"username": "u", "password": "secret"}));
        assert_eq!(user["password"], "<redacted>");
        assert_eq!(user["username"], "u");
    }
}
