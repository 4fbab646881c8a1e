#![cfg(feature = "sqlite")]

use ibatix::Configuration;
use ibatix::driver::Environment;
use ibatix::driver::sqlite::SqliteDriver;
use ibatix::session::SqlSessionFactory;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAPPER: &str = r#"
<mapper namespace="user">
    <update id="createTable">
        CREATE TABLE users (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            age  INTEGER
        )
    </update>

    <insert id="add" useGeneratedKeys="true" keyProperty="id">
        INSERT INTO users(name, age) VALUES (#{name}, #{age})
    </insert>

    <select id="find" resultType="map">
        SELECT id, name, age FROM users
        <where>
            <if test="name != null">AND name = #{name}</if>
            <if test="minAge != null">AND age &gt;= #{minAge}</if>
        </where>
        ORDER BY id
    </select>

    <delete id="deleteByIds">
        DELETE FROM users WHERE id IN
        <foreach collection="ids" item="i" open="(" separator="," close=")">#{i}</foreach>
    </delete>

    <select id="count" resultType="long">
        SELECT COUNT(*) FROM users
    </select>
</mapper>
"#;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct User {
    id: Option<i64>,
    name: String,
    age: Option<i64>,
}

#[derive(Serialize)]
struct Filter {
    name: Option<String>,
    #[serde(rename = "minAge")]
    min_age: Option<i64>,
}

fn factory() -> SqlSessionFactory {
    let driver = SqliteDriver::new("sqlite::memory:").build().unwrap();
    let mut config = Configuration::new();
    config.set_environment(Environment::new("dev", Arc::new(driver)));
    config.register_xml("user.xml", MAPPER).unwrap();
    config.check_incomplete().unwrap();
    SqlSessionFactory::new(config)
}

// An in-memory database lives and dies with its connection, so each test
// runs inside one session.

#[test]
fn insert_select_delete_round_trip() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    session.update("user.createTable", &()).unwrap();

    let mut alice = User {
        id: None,
        name: "alice".to_string(),
        age: Some(30),
    };
    let mut bob = User {
        id: None,
        name: "bob".to_string(),
        age: Some(25),
    };
    assert_eq!(session.insert_with_keys("user.add", &mut alice).unwrap(), 1);
    assert_eq!(session.insert_with_keys("user.add", &mut bob).unwrap(), 1);
    let alice_id = alice.id.expect("generated key propagated");
    assert!(bob.id.unwrap() > alice_id);

    let all: Vec<User> = session
        .select_list(
            "user.find",
            &Filter {
                name: None,
                min_age: None,
            },
        )
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "alice");

    let adults: Vec<User> = session
        .select_list(
            "user.find",
            &Filter {
                name: None,
                min_age: Some(28),
            },
        )
        .unwrap();
    assert_eq!(adults.len(), 1);
    assert_eq!(adults[0].name, "alice");

    let by_name: Option<User> = session
        .select_one(
            "user.find",
            &Filter {
                name: Some("bob".to_string()),
                min_age: None,
            },
        )
        .unwrap();
    assert_eq!(by_name.unwrap().id, bob.id);

    #[derive(Serialize)]
    struct Ids {
        ids: Vec<i64>,
    }
    let deleted = session
        .delete("user.deleteByIds", &Ids { ids: vec![alice_id] })
        .unwrap();
    assert_eq!(deleted, 1);

    let remaining: Option<i64> = session.select_one("user.count", &()).unwrap();
    assert_eq!(remaining, Some(1));
    session.close();
}

#[test]
fn rollback_discards_uncommitted_writes() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    session.update("user.createTable", &()).unwrap();
    session.commit().unwrap();

    let mut carol = User {
        id: None,
        name: "carol".to_string(),
        age: None,
    };
    session.insert_with_keys("user.add", &mut carol).unwrap();
    let count: Option<i64> = session.select_one("user.count", &()).unwrap();
    assert_eq!(count, Some(1));

    session.rollback().unwrap();
    let count: Option<i64> = session.select_one("user.count", &()).unwrap();
    assert_eq!(count, Some(0));
    session.close();
}

#[test]
fn select_map_projects_by_property() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    session.update("user.createTable", &()).unwrap();
    for (name, age) in [("a", 1), ("b", 2)] {
        session
            .insert(
                "user.add",
                &User {
                    id: None,
                    name: name.to_string(),
                    age: Some(age),
                },
            )
            .unwrap();
    }

    let by_name: std::collections::HashMap<String, User> = session
        .select_map(
            "user.find",
            &Filter {
                name: None,
                min_age: None,
            },
            "name",
        )
        .unwrap();
    assert_eq!(by_name.len(), 2);
    assert_eq!(by_name["b"].age, Some(2));
    session.close();
}
