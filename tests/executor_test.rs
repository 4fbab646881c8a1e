mod common;

use common::{MockDriver, rs};
use ibatix::driver::Environment;
use ibatix::executor::ExecutorType;
use ibatix::session::SqlSessionFactory;
use ibatix::value::Value;
use ibatix::{Configuration, reflection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn factory(mapper_xml: &str, driver: &MockDriver) -> SqlSessionFactory {
    factory_with(mapper_xml, driver, |_| {})
}

fn factory_with(
    mapper_xml: &str,
    driver: &MockDriver,
    tweak: impl FnOnce(&mut Configuration),
) -> SqlSessionFactory {
    let mut config = Configuration::new();
    tweak(&mut config);
    config.set_environment(Environment::new("test", Arc::new(driver.clone())));
    config.register_xml("test.xml", mapper_xml).unwrap();
    config.check_incomplete().unwrap();
    SqlSessionFactory::new(config)
}

#[test]
fn session_cache_reuses_results_until_a_write() {
    let driver = MockDriver::new();
    driver.respond(
        "SELECT * FROM t",
        vec![rs(&["id"], vec![vec![Value::Long(1)], vec![Value::Long(2)]])],
    );
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <select id="q" resultType="map">SELECT * FROM t</select>
            <update id="u">UPDATE t SET x = 1</update>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    let first = session.select_raw("ns.q", &()).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(driver.query_count("SELECT * FROM t"), 1);

    // Identical statement and parameter: served from the session cache.
    let second = session.select_raw("ns.q", &()).unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(driver.query_count("SELECT * FROM t"), 1);

    // A write in the same session invalidates the local cache.
    session.update("ns.u", &()).unwrap();
    let third = session.select_raw("ns.q", &()).unwrap();
    assert_eq!(third.len(), 2);
    assert_eq!(driver.query_count("SELECT * FROM t"), 2);

    session.close();
}

#[test]
fn distinct_parameters_use_distinct_cache_keys() {
    let driver = MockDriver::new();
    driver.respond("SELECT * FROM t WHERE id = ?", vec![rs(&["id"], vec![])]);
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <select id="byId" resultType="map">SELECT * FROM t WHERE id = #{id}</select>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    #[derive(Serialize)]
    struct P {
        id: i64,
    }
    session.select_raw("ns.byId", &P { id: 1 }).unwrap();
    session.select_raw("ns.byId", &P { id: 2 }).unwrap();
    session.select_raw("ns.byId", &P { id: 1 }).unwrap();
    assert_eq!(driver.query_count("SELECT * FROM t WHERE id = ?"), 2);
    session.close();
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Bean {
    id: Option<i64>,
    name: String,
}

#[test]
fn generated_keys_propagate_to_parameter_object() {
    let driver = MockDriver::new();
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <insert id="add" useGeneratedKeys="true" keyProperty="id">
                INSERT INTO t(name) VALUES (#{name})
            </insert>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    let mut bean = Bean {
        id: None,
        name: "a".to_string(),
    };
    let affected = session.insert_with_keys("ns.add", &mut bean).unwrap();
    assert_eq!(affected, 1);
    assert_eq!(bean.id, Some(100));
    session.close();
}

#[test]
fn batch_insert_distributes_keys_in_iteration_order() {
    let driver = MockDriver::new();
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <insert id="add" useGeneratedKeys="true" keyProperty="id">
                INSERT INTO t(name) VALUES (#{name})
            </insert>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory
        .open_session_with(ExecutorType::Batch, false)
        .unwrap();

    for name in ["a", "b", "c"] {
        let bean = Bean {
            id: None,
            name: name.to_string(),
        };
        session.insert("ns.add", &bean).unwrap();
    }
    let results = session.flush_statements().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].update_counts, vec![1, 1, 1]);

    let ids: Vec<&Value> = results[0]
        .parameters
        .iter()
        .map(|p| reflection::get_value(p, "id"))
        .collect();
    assert_eq!(ids, vec![&Value::Long(100), &Value::Long(101), &Value::Long(102)]);
    session.close();
}

#[test]
fn discriminator_cycle_terminates_on_visited_map() {
    let driver = MockDriver::new();
    driver.respond(
        "SELECT k, name FROM t",
        vec![rs(
            &["k", "name"],
            vec![vec![Value::Text("1".to_string()), Value::Text("x".to_string())]],
        )],
    );
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <resultMap id="M" type="map" autoMapping="false">
                <discriminator column="k" javaType="string">
                    <case value="1" resultMap="M1"/>
                </discriminator>
            </resultMap>
            <resultMap id="M1" type="map" autoMapping="false">
                <result property="viaM1" column="name"/>
                <discriminator column="k" javaType="string">
                    <case value="1" resultMap="M"/>
                </discriminator>
            </resultMap>
            <select id="disc" resultMap="M">SELECT k, name FROM t</select>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    let rows = session.select_raw("ns.disc", &()).unwrap();
    assert_eq!(rows.len(), 1);
    // The cycle guard stops at the already-visited map, leaving M1 as the
    // effective projection.
    assert_eq!(
        reflection::get_value(&rows[0], "viaM1"),
        &Value::Text("x".to_string())
    );
    session.close();
}

#[test]
fn nested_result_map_collapses_repeated_parents() {
    let driver = MockDriver::new();
    driver.respond(
        "SELECT u JOIN o",
        vec![rs(
            &["uid", "uname", "oid", "item"],
            vec![
                vec![
                    Value::Long(1),
                    Value::Text("a".to_string()),
                    Value::Long(10),
                    Value::Text("x".to_string()),
                ],
                vec![
                    Value::Long(1),
                    Value::Text("a".to_string()),
                    Value::Long(11),
                    Value::Text("y".to_string()),
                ],
                vec![
                    Value::Long(2),
                    Value::Text("b".to_string()),
                    Value::Long(12),
                    Value::Text("z".to_string()),
                ],
            ],
        )],
    );
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <resultMap id="userMap" type="map" autoMapping="false">
                <id property="id" column="uid"/>
                <result property="name" column="uname"/>
                <collection property="orders" ofType="map">
                    <id property="oid" column="oid"/>
                    <result property="item" column="item"/>
                </collection>
            </resultMap>
            <select id="users" resultMap="userMap">SELECT u JOIN o</select>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    let rows = session.select_raw("ns.users", &()).unwrap();
    assert_eq!(rows.len(), 2);

    let orders = reflection::get_value(&rows[0], "orders");
    let Value::List(items) = orders else {
        panic!("expected a collection, got {:?}", orders)
    };
    assert_eq!(items.len(), 2);
    assert_eq!(
        reflection::get_value(&items[0], "item"),
        &Value::Text("x".to_string())
    );
    assert_eq!(
        reflection::get_value(&items[1], "item"),
        &Value::Text("y".to_string())
    );

    let second = reflection::get_value(&rows[1], "orders");
    let Value::List(items) = second else { panic!() };
    assert_eq!(items.len(), 1);
    session.close();
}

#[test]
fn nested_select_runs_once_and_defers_repeats() {
    let driver = MockDriver::new();
    driver.respond(
        "SELECT * FROM orders",
        vec![rs(
            &["id", "user_id"],
            vec![
                vec![Value::Long(1), Value::Long(5)],
                vec![Value::Long(2), Value::Long(5)],
            ],
        )],
    );
    driver.respond(
        "SELECT * FROM users WHERE id = ?",
        vec![rs(
            &["id", "name"],
            vec![vec![Value::Long(5), Value::Text("u".to_string())]],
        )],
    );
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <resultMap id="orderMap" type="map" autoMapping="true">
                <id property="id" column="id"/>
                <association property="user" column="user_id" select="userById"/>
            </resultMap>
            <select id="orders" resultMap="orderMap">SELECT * FROM orders</select>
            <select id="userById" resultType="map">SELECT * FROM users WHERE id = #{id}</select>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    let rows = session.select_raw("ns.orders", &()).unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(
            reflection::get_value(row, "user.name"),
            &Value::Text("u".to_string())
        );
    }
    // The second row's sub-query was answered by the first-level cache and
    // resolved through the deferred-load queue.
    assert_eq!(driver.query_count("SELECT * FROM users WHERE id = ?"), 1);
    session.close();
}

#[test]
fn named_result_set_feeds_pending_relations() {
    let driver = MockDriver::new();
    driver.respond(
        "CALL get_users_orders()",
        vec![
            rs(
                &["uid", "uname"],
                vec![
                    vec![Value::Long(1), Value::Text("a".to_string())],
                    vec![Value::Long(2), Value::Text("b".to_string())],
                ],
            ),
            rs(
                &["oid", "user_id"],
                vec![
                    vec![Value::Long(10), Value::Long(1)],
                    vec![Value::Long(11), Value::Long(1)],
                ],
            ),
        ],
    );
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <resultMap id="uMap" type="map" autoMapping="false">
                <id property="id" column="uid"/>
                <result property="name" column="uname"/>
                <collection property="orders" resultSet="orders" column="uid"
                            foreignColumn="user_id" resultMap="oMap"/>
            </resultMap>
            <resultMap id="oMap" type="map" autoMapping="false">
                <id property="id" column="oid"/>
                <result property="userId" column="user_id"/>
            </resultMap>
            <select id="multi" resultMap="uMap" resultSets="users,orders">CALL get_users_orders()</select>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    let rows = session.select_raw("ns.multi", &()).unwrap();
    assert_eq!(rows.len(), 2);

    let Value::List(orders) = reflection::get_value(&rows[0], "orders") else {
        panic!()
    };
    assert_eq!(orders.len(), 2);
    // The second parent saw no child rows but still reads as empty.
    assert_eq!(
        reflection::get_value(&rows[1], "orders"),
        &Value::List(Vec::new())
    );
    session.close();
}

#[test]
fn lazy_mapped_properties_resolve_through_loader_sweep() {
    let driver = MockDriver::new();
    driver.respond(
        "SELECT * FROM orders",
        vec![rs(
            &["id", "user_id"],
            vec![vec![Value::Long(1), Value::Long(5)]],
        )],
    );
    driver.respond(
        "SELECT * FROM users WHERE id = ?",
        vec![rs(
            &["id", "name"],
            vec![vec![Value::Long(5), Value::Text("u".to_string())]],
        )],
    );
    let factory = factory_with(
        r#"
        <mapper namespace="ns">
            <resultMap id="orderMap" type="map" autoMapping="true">
                <id property="id" column="id"/>
                <association property="user" column="user_id" select="userById" fetchType="lazy"/>
            </resultMap>
            <select id="orders" resultMap="orderMap">SELECT * FROM orders</select>
            <select id="userById" resultType="map">SELECT * FROM users WHERE id = #{id}</select>
        </mapper>
        "#,
        &driver,
        |config| config.settings.lazy_loading_enabled = true,
    );
    let mut session = factory.open_session().unwrap();

    let rows = session.select_raw("ns.orders", &()).unwrap();
    // The default proxy factory sweeps every registered loader, so the
    // property is populated by the time the row is handed out.
    assert_eq!(
        reflection::get_value(&rows[0], "user.name"),
        &Value::Text("u".to_string())
    );
    session.close();
}

#[test]
fn namespace_cache_publishes_on_commit_and_serves_other_sessions() {
    let driver = MockDriver::new();
    driver.respond(
        "SELECT * FROM t",
        vec![rs(&["id"], vec![vec![Value::Long(1)]])],
    );
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <cache/>
            <select id="q" resultType="map">SELECT * FROM t</select>
        </mapper>
        "#,
        &driver,
    );

    let mut first = factory.open_session().unwrap();
    first.select_raw("ns.q", &()).unwrap();
    assert_eq!(driver.query_count("SELECT * FROM t"), 1);
    // Staged entries are invisible to other sessions until commit.
    let mut probe = factory.open_session().unwrap();
    probe.select_raw("ns.q", &()).unwrap();
    assert_eq!(driver.query_count("SELECT * FROM t"), 2);
    probe.close();
    first.commit().unwrap();
    first.close();

    let mut second = factory.open_session().unwrap();
    let rows = second.select_raw("ns.q", &()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(driver.query_count("SELECT * FROM t"), 2);
    second.close();
}

#[test]
fn row_bounds_window_the_scan() {
    let driver = MockDriver::new();
    driver.respond(
        "SELECT * FROM t",
        vec![rs(
            &["id"],
            (0..10).map(|i| vec![Value::Long(i)]).collect(),
        )],
    );
    let factory = factory(
        r#"
        <mapper namespace="ns">
            <select id="q" resultType="map">SELECT * FROM t</select>
        </mapper>
        "#,
        &driver,
    );
    let mut session = factory.open_session().unwrap();

    let page: Vec<Value> = session
        .select_raw_with_bounds(
            "ns.q",
            &(),
            ibatix::mapping::RowBounds {
                offset: 2,
                limit: 3,
            },
        )
        .unwrap();
    assert_eq!(page.len(), 3);
    assert_eq!(reflection::get_value(&page[0], "id"), &Value::Long(2));
    session.close();
}
