mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn options_list_every_vocabulary() -> Result<()> {
    let server = common::start_server().await?;

    let (status, body) = common::send(reqwest::Client::new().get(server.url("/public/options"))).await?;

    assert_eq!(status, StatusCode::OK);
    let options = &body["options"];
    for key in [
        "roles",
        "ticketTypes",
        "ticketCategories",
        "ticketPriorities",
        "ticketStatuses",
        "departments",
        "projectStatuses",
        "projectPriorities",
        "resourceTypes",
        "resourceCategories",
        "resourceUnits",
    ] {
        assert!(options[key].as_array().is_some_and(|v| !v.is_empty()), "{}", key);
    }
    Ok(())
}

#[tokio::test]
async fn public_teams_are_listed_when_the_database_is_up() -> Result<()> {
    let server = common::start_server().await?;
    if !server.has_database().await? {
        return Ok(());
    }

    let (status, body) = common::send(reqwest::Client::new().get(server.url("/public/teams"))).await?;

    assert_eq!(status, StatusCode::OK);
    assert!(body["teams"].is_array());
    Ok(())
}
