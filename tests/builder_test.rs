use ibatix::Configuration;
use ibatix::Error;
use ibatix::builder::annotation::{MapperDef, MapperMethod, ResultAnn};
use ibatix::mapping::KeyGenerator;

#[test]
fn local_ids_are_qualified_and_dotted_references_pass_through() {
    let mut config = Configuration::new();
    config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <resultMap id="userMap" type="map">
                    <id property="id" column="id"/>
                </resultMap>
                <select id="byId" resultMap="userMap">SELECT 1</select>
                <select id="byRef" resultMap="ns.userMap">SELECT 1</select>
            </mapper>
            "#,
        )
        .unwrap();
    config.check_incomplete().unwrap();

    assert!(config.has_result_map("ns.userMap"));
    assert!(config.has_statement("ns.byId"));
    let ms = config.get_mapped_statement("ns.byRef").unwrap();
    assert_eq!(ms.result_maps[0].id, "ns.userMap");
}

#[test]
fn dots_in_local_ids_are_rejected() {
    let mut config = Configuration::new();
    let err = config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <select id="bad.id" resultType="map">SELECT 1</select>
            </mapper>
            "#,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Builder(_)));
}

#[test]
fn result_map_extension_merges_with_child_override() {
    let mut config = Configuration::new();
    config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <resultMap id="P" type="map">
                    <result property="a" column="A"/>
                    <result property="b" column="B"/>
                </resultMap>
                <resultMap id="C" type="map" extends="P">
                    <result property="b" column="B2"/>
                    <result property="c" column="C"/>
                </resultMap>
            </mapper>
            "#,
        )
        .unwrap();
    config.check_incomplete().unwrap();

    let merged = config.get_result_map("ns.C").unwrap();
    let pairs: Vec<(String, String)> = merged
        .result_mappings
        .iter()
        .map(|m| {
            (
                m.property.clone().unwrap(),
                m.column.clone().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("a".to_string(), "A".to_string()),
            ("b".to_string(), "B2".to_string()),
            ("c".to_string(), "C".to_string()),
        ]
    );
}

#[test]
fn child_constructor_entries_drop_parent_constructor_entries() {
    let mut config = Configuration::new();
    config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <resultMap id="P" type="map">
                    <constructor>
                        <arg name="x" column="X"/>
                    </constructor>
                    <result property="a" column="A"/>
                </resultMap>
                <resultMap id="C" type="map" extends="P">
                    <constructor>
                        <arg name="y" column="Y"/>
                    </constructor>
                </resultMap>
            </mapper>
            "#,
        )
        .unwrap();

    let merged = config.get_result_map("ns.C").unwrap();
    assert_eq!(merged.constructor_result_mappings.len(), 1);
    assert_eq!(
        merged.constructor_result_mappings[0].property.as_deref(),
        Some("y")
    );
    // The parent's plain property survives.
    assert!(merged.mapped_properties.contains("a"));
}

#[test]
fn forward_references_resolve_across_sources() {
    let mut config = Configuration::new();

    // First source: extends a map and includes a fragment that do not
    // exist yet, and points its cache at an unparsed namespace.
    config
        .register_xml(
            "first.xml",
            r#"
            <mapper namespace="first">
                <cache-ref namespace="second"/>
                <resultMap id="C" type="map" extends="second.P">
                    <result property="c" column="C"/>
                </resultMap>
                <select id="q" resultType="map">
                    SELECT <include refid="second.cols"/> FROM t
                </select>
            </mapper>
            "#,
        )
        .unwrap();
    assert!(config.check_incomplete().is_err());
    assert!(!config.has_result_map("first.C"));

    // Second source supplies everything; the worklists converge.
    config
        .register_xml(
            "second.xml",
            r#"
            <mapper namespace="second">
                <cache/>
                <sql id="cols">id, name</sql>
                <resultMap id="P" type="map">
                    <result property="p" column="P"/>
                </resultMap>
            </mapper>
            "#,
        )
        .unwrap();
    config.check_incomplete().unwrap();

    let merged = config.get_result_map("first.C").unwrap();
    assert!(merged.mapped_properties.contains("p"));
    assert!(merged.mapped_properties.contains("c"));

    let ms = config.get_mapped_statement("first.q").unwrap();
    let bound = ms
        .get_bound_sql(&config, &ibatix::Value::Map(Default::default()))
        .unwrap();
    assert_eq!(bound.sql, "SELECT id, name FROM t");

    // The cache-ref resolved to the second namespace's cache.
    assert!(ms.cache.is_some());
    assert_eq!(ms.cache.as_ref().unwrap().id(), "second");
}

#[test]
fn unresolved_references_surface_at_bootstrap_end() {
    let mut config = Configuration::new();
    config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <select id="q" resultMap="nowhere.toBeFound">SELECT 1</select>
            </mapper>
            "#,
        )
        .unwrap();
    let err = config.check_incomplete().unwrap_err();
    assert!(matches!(err, Error::Builder(_)));
    assert!(err.to_string().contains("ns.q"));
}

#[test]
fn select_key_compiles_to_synthetic_statement() {
    let mut config = Configuration::new();
    config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <insert id="create">
                    <selectKey keyProperty="id" resultType="long" order="BEFORE">
                        SELECT seq_next()
                    </selectKey>
                    INSERT INTO t (id, name) VALUES (#{id}, #{name})
                </insert>
            </mapper>
            "#,
        )
        .unwrap();
    config.check_incomplete().unwrap();

    let key_id = "ns.create!selectKey";
    assert!(config.has_statement(key_id));
    let key_ms = config.get_mapped_statement(key_id).unwrap();
    assert_eq!(key_ms.key_properties, vec!["id".to_string()]);
    assert!(!key_ms.use_cache);

    let parent = config.get_mapped_statement("ns.create").unwrap();
    match &parent.key_generator {
        KeyGenerator::SelectKey {
            statement_id,
            execute_before,
        } => {
            assert_eq!(statement_id, key_id);
            assert!(execute_before);
        }
        other => panic!("expected SelectKey generator, got {:?}", other),
    }
    assert!(config.get_key_generator(key_id).is_some());
}

#[test]
fn duplicate_statement_ids_are_fatal() {
    let mut config = Configuration::new();
    let err = config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <select id="q" resultType="map">SELECT 1</select>
                <select id="q" resultType="map">SELECT 2</select>
            </mapper>
            "#,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Builder(_)));
}

#[test]
fn database_id_variants_prefer_exact_match() {
    let mut config = Configuration::new();
    config.set_database_id(Some("sqlite".to_string()));
    config
        .register_xml(
            "a.xml",
            r#"
            <mapper namespace="ns">
                <select id="now" resultType="map" databaseId="sqlite">SELECT datetime('now')</select>
                <select id="now" resultType="map">SELECT CURRENT_TIMESTAMP</select>
                <select id="generic" resultType="map">SELECT 1</select>
                <select id="foreign" resultType="map" databaseId="postgres">SELECT now()</select>
            </mapper>
            "#,
        )
        .unwrap();
    config.check_incomplete().unwrap();

    let ms = config.get_mapped_statement("ns.now").unwrap();
    assert_eq!(ms.database_id.as_deref(), Some("sqlite"));
    assert!(config.has_statement("ns.generic"));
    assert!(!config.has_statement("ns.foreign"));
}

#[test]
fn annotated_mapper_registers_statements() {
    let mut config = Configuration::new();
    let def = MapperDef::new("app.UserMapper")
        .method(MapperMethod::select(
            "by_id",
            "SELECT id, name FROM users WHERE id = #{id}",
        ))
        .method({
            let mut m = MapperMethod::select("all", "SELECT id, name FROM users");
            m.results = vec![
                ResultAnn {
                    id: true,
                    property: "id".to_string(),
                    column: "id".to_string(),
                    ..Default::default()
                },
                ResultAnn {
                    property: "name".to_string(),
                    column: "name".to_string(),
                    ..Default::default()
                },
            ];
            m
        })
        .method({
            let mut m = MapperMethod::insert("add", "INSERT INTO users(name) VALUES (#{name})");
            m.options.use_generated_keys = true;
            m.options.key_property = Some("id".to_string());
            m
        });
    config.register_annotated(def).unwrap();
    config.check_incomplete().unwrap();

    assert!(config.has_statement("app.UserMapper.by_id"));
    let all = config.get_mapped_statement("app.UserMapper.all").unwrap();
    assert_eq!(all.result_maps[0].id, "app.UserMapper.all-Results");
    assert!(all.result_maps[0].mapped_properties.contains("name"));

    let add = config.get_mapped_statement("app.UserMapper.add").unwrap();
    assert!(matches!(add.key_generator, KeyGenerator::Jdbc3));
    assert_eq!(add.key_properties, vec!["id".to_string()]);
}

#[test]
fn annotated_cache_ref_waits_for_target_namespace() {
    let mut config = Configuration::new();
    let mut def = MapperDef::new("app.OrderMapper");
    def.cache_ref = Some("app.UserMapper".to_string());
    let def = def.method(MapperMethod::select("all", "SELECT * FROM orders"));
    config.register_annotated(def).unwrap();
    assert!(config.check_incomplete().is_err());

    let mut user_def = MapperDef::new("app.UserMapper");
    user_def.cache = Some(Default::default());
    config.register_annotated(user_def).unwrap();
    config.check_incomplete().unwrap();

    let ms = config
        .get_mapped_statement("app.OrderMapper.all")
        .unwrap();
    assert_eq!(ms.cache.as_ref().unwrap().id(), "app.UserMapper");
}
