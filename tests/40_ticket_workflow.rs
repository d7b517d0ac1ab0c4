mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn team_manager_submits_and_sees_a_ticket() -> Result<()> {
    let server = common::start_server().await?;
    if !server.has_database().await? {
        return Ok(());
    }
    let client = reqwest::Client::new();
    let (token, user) = common::register_team_manager(&server).await?;
    assert_eq!(user["role"], "team");
    assert!(user["teamId"].is_i64());
    assert!(user.get("passwordHash").is_none());

    let (status, body) = common::send(client.post(server.url("/tickets")).bearer_auth(&token).json(&json!({
        "title": "Laptop will not boot",
        "description": "Black screen after the BIOS logo",
        "type": "INCIDENT",
        "category": "HARDWARE",
        "priority": "HIGH"
    })))
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let ticket = &body["ticket"];
    assert_eq!(ticket["status"], "PENDING_APPROVAL");
    assert_eq!(ticket["department"], "IT");
    assert_eq!(ticket["teamId"], user["teamId"]);
    let ticket_id = ticket["id"].as_i64().unwrap_or_default();

    // Approval belongs to admins
    let (status, body) = common::send(
        client
            .put(server.url(&format!("/tickets/{}/approve", ticket_id)))
            .bearer_auth(&token)
            .json(&json!({ "action": "approve" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);

    let (status, body) = common::send(client.get(server.url("/tickets")).bearer_auth(&token)).await?;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["tickets"]
        .as_array()
        .map(|t| t.iter().filter_map(|t| t["id"].as_i64()).collect())
        .unwrap_or_default();
    assert!(ids.contains(&ticket_id));
    assert!(body["pagination"]["total"].as_i64().unwrap_or_default() >= 1);

    // The creating team hears about its own ticket
    let (status, body) = common::send(client.get(server.url("/notifications")).bearer_auth(&token)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["unreadCount"].as_i64().unwrap_or_default() >= 1);
    Ok(())
}

#[tokio::test]
async fn member_ticket_is_approved_once() -> Result<()> {
    let server = common::start_server().await?;
    if !server.has_database().await? {
        return Ok(());
    }
    let client = reqwest::Client::new();
    let (_, manager) = common::register_team_manager(&server).await?;
    let team_id = manager["teamId"].as_i64().unwrap_or_default();
    let (member, _) = common::register(&server, "user", json!({ "teamId": team_id })).await?;
    let (admin, admin_user) = common::register(&server, "admin", json!({ "teamId": team_id })).await?;

    // Type and category are optional
    let (status, body) = common::send(client.post(server.url("/tickets")).bearer_auth(&member).json(&json!({
        "title": "Fix login bug",
        "description": "Users cannot log in after reset",
        "teamId": team_id,
        "priority": "HIGH",
        "dueDate": "2025-12-31"
    })))
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let ticket = &body["ticket"];
    assert_eq!(ticket["status"], "PENDING_APPROVAL");
    assert_eq!(ticket["ticketType"], "INCIDENT");
    assert_eq!(ticket["category"], "OTHER");
    assert_eq!(ticket["dueDate"], "2025-12-31");
    let ticket_url = server.url(&format!("/tickets/{}", ticket["id"].as_i64().unwrap_or_default()));

    let approve = json!({ "status": "APPROVED", "priority": "HIGH" });
    let (status, body) = common::send(client.put(&ticket_url).bearer_auth(&admin).json(&approve)).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["ticket"]["status"], "APPROVED");
    assert_eq!(body["ticket"]["approvedBy"], admin_user["id"]);

    let (status, body) = common::send(client.put(&ticket_url).bearer_auth(&admin).json(&approve)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(body["error"], "AlreadyProcessed");

    let (status, body) = common::send(client.get(&ticket_url).bearer_auth(&member)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ticket"]["status"], "APPROVED");
    Ok(())
}

#[tokio::test]
async fn ticket_without_title_or_description_lists_both() -> Result<()> {
    let server = common::start_server().await?;
    if !server.has_database().await? {
        return Ok(());
    }
    let (token, _) = common::register_team_manager(&server).await?;

    let request = reqwest::Client::new()
        .post(server.url("/tickets"))
        .bearer_auth(&token)
        .json(&json!({ "title": "  " }));
    let (status, body) = common::send(request).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(common::detail_fields(&body), vec!["title", "description"]);
    Ok(())
}

#[tokio::test]
async fn member_cannot_read_other_teams() -> Result<()> {
    let server = common::start_server().await?;
    if !server.has_database().await? {
        return Ok(());
    }
    let (first, first_user) = common::register_team_manager(&server).await?;
    let (second, _) = common::register_team_manager(&server).await?;
    let client = reqwest::Client::new();

    let team_id = first_user["teamId"].as_i64().unwrap_or_default();
    let members_url = server.url(&format!("/teams/{}/members", team_id));
    let (status, _) = common::send(client.get(&members_url).bearer_auth(&first)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = common::send(client.get(&members_url).bearer_auth(&second)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);
    Ok(())
}
