use ibatix::Configuration;
use ibatix::executor::parameter::build_parameters;
use ibatix::value::{Value, to_value};
use serde::Serialize;

const MAPPER: &str = r#"
<mapper namespace="user">
    <select id="byId" resultType="map">
        SELECT * FROM t WHERE id = #{id}
    </select>

    <select id="find" resultType="map">
        SELECT * FROM t
        <where>
            <if test="name != null">AND name=#{name}</if>
            <if test="age != null">AND age=#{age}</if>
        </where>
    </select>

    <delete id="deleteByIds">
        DELETE FROM t WHERE id IN
        <foreach collection="ids" item="i" open="(" separator="," close=")">#{i}</foreach>
    </delete>

    <update id="touch">
        UPDATE t
        <set>
            <if test="name != null">name=#{name},</if>
            <if test="age != null">age=#{age},</if>
        </set>
        WHERE id = #{id}
    </update>

    <select id="pick" resultType="map">
        SELECT * FROM t
        <choose>
            <when test="name != null">WHERE name=#{name}</when>
            <when test="age != null">WHERE age=#{age}</when>
            <otherwise>WHERE 1=1</otherwise>
        </choose>
    </select>

    <select id="like" resultType="map">
        <bind name="pattern" value="'%x%'"/>
        SELECT * FROM t WHERE name LIKE #{pattern}
    </select>

    <select id="ordered" resultType="map">
        SELECT * FROM ${tableName} ORDER BY id
    </select>
</mapper>
"#;

#[derive(Serialize)]
struct Filter {
    name: Option<String>,
    age: Option<i32>,
}

fn config() -> Configuration {
    let mut config = Configuration::new();
    config
        .variables
        .insert("tableName".to_string(), "t_real".to_string());
    config.register_xml("user.xml", MAPPER).unwrap();
    config.check_incomplete().unwrap();
    config
}

fn bound_sql(config: &Configuration, id: &str, parameter: &Value) -> ibatix::mapping::BoundSql {
    let ms = config.get_mapped_statement(id).unwrap();
    ms.get_bound_sql(config, parameter).unwrap()
}

#[test]
fn basic_placeholder() {
    let config = config();
    let parameter = to_value(&serde_json_like(&[("id", Value::Long(7))])).unwrap();
    let bound = bound_sql(&config, "user.byId", &parameter);
    assert_eq!(bound.sql, "SELECT * FROM t WHERE id = ?");
    assert_eq!(bound.parameter_mappings.len(), 1);
    assert_eq!(bound.parameter_mappings[0].property, "id");
    assert_eq!(
        bound.sql.matches('?').count(),
        bound.parameter_mappings.len()
    );

    let params = build_parameters(&config, &bound, &parameter).unwrap();
    assert_eq!(params, vec![("id".to_string(), Value::Long(7))]);
}

#[test]
fn if_branches_inside_where() {
    let config = config();

    let one = to_value(&Filter {
        name: Some("x".to_string()),
        age: None,
    })
    .unwrap();
    assert_eq!(
        bound_sql(&config, "user.find", &one).sql,
        "SELECT * FROM t WHERE name=?"
    );

    let none = to_value(&Filter {
        name: None,
        age: None,
    })
    .unwrap();
    assert_eq!(bound_sql(&config, "user.find", &none).sql, "SELECT * FROM t");

    let both = to_value(&Filter {
        name: Some("x".to_string()),
        age: Some(30),
    })
    .unwrap();
    let bound = bound_sql(&config, "user.find", &both);
    assert_eq!(bound.sql, "SELECT * FROM t WHERE name=? AND age=?");
    assert_eq!(bound.parameter_mappings.len(), 2);
}

#[derive(Serialize)]
struct Ids {
    ids: Vec<i64>,
}

#[test]
fn foreach_itemizes_each_element() {
    let config = config();
    let parameter = to_value(&Ids { ids: vec![1, 2, 3] }).unwrap();
    let bound = bound_sql(&config, "user.deleteByIds", &parameter);
    assert_eq!(bound.sql, "DELETE FROM t WHERE id IN (?,?,?)");

    let properties: Vec<&str> = bound
        .parameter_mappings
        .iter()
        .map(|m| m.property.as_str())
        .collect();
    assert_eq!(properties, vec!["__frch_i_0", "__frch_i_1", "__frch_i_2"]);

    // Every placeholder resolves to a distinct element binding.
    let params = build_parameters(&config, &bound, &parameter).unwrap();
    let values: Vec<Value> = params.into_iter().map(|(_, v)| v).collect();
    assert_eq!(values, vec![Value::Long(1), Value::Long(2), Value::Long(3)]);

    // Uniqueness across iterations.
    let mut seen = std::collections::HashSet::new();
    for mapping in &bound.parameter_mappings {
        assert!(seen.insert(mapping.property.clone()));
    }
}

#[test]
fn set_strips_trailing_comma() {
    let config = config();
    let parameter = to_value(&serde_json_like(&[
        ("id", Value::Long(1)),
        ("name", Value::Text("n".to_string())),
        ("age", Value::Null),
    ]))
    .unwrap();
    let bound = bound_sql(&config, "user.touch", &parameter);
    assert_eq!(bound.sql, "UPDATE t SET name=? WHERE id = ?");
}

#[test]
fn choose_picks_first_true_branch() {
    let config = config();

    let by_name = to_value(&Filter {
        name: Some("x".to_string()),
        age: Some(1),
    })
    .unwrap();
    assert_eq!(
        bound_sql(&config, "user.pick", &by_name).sql,
        "SELECT * FROM t WHERE name=?"
    );

    let by_age = to_value(&Filter {
        name: None,
        age: Some(1),
    })
    .unwrap();
    assert_eq!(
        bound_sql(&config, "user.pick", &by_age).sql,
        "SELECT * FROM t WHERE age=?"
    );

    let fallback = to_value(&Filter {
        name: None,
        age: None,
    })
    .unwrap();
    assert_eq!(
        bound_sql(&config, "user.pick", &fallback).sql,
        "SELECT * FROM t WHERE 1=1"
    );
}

#[test]
fn bind_introduces_parameter_binding() {
    let config = config();
    let parameter = Value::Map(Default::default());
    let bound = bound_sql(&config, "user.like", &parameter);
    assert_eq!(bound.sql, "SELECT * FROM t WHERE name LIKE ?");
    assert_eq!(
        bound.get_additional_parameter("pattern"),
        Value::Text("%x%".to_string())
    );
    let params = build_parameters(&config, &bound, &parameter).unwrap();
    assert_eq!(params[0].1, Value::Text("%x%".to_string()));
}

#[test]
fn configuration_variables_substitute_in_text() {
    let config = config();
    let bound = bound_sql(&config, "user.ordered", &Value::Map(Default::default()));
    assert_eq!(bound.sql, "SELECT * FROM t_real ORDER BY id");
}

/// Little helper building a map parameter without a throwaway struct.
fn serde_json_like(entries: &[(&str, Value)]) -> std::collections::HashMap<String, SerdeValue> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), SerdeValue(v.clone())))
        .collect()
}

struct SerdeValue(Value);

impl Serialize for SerdeValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Value::Null => serializer.serialize_none(),
            Value::Long(n) => serializer.serialize_i64(*n),
            Value::Int(n) => serializer.serialize_i32(*n),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bool(b) => serializer.serialize_bool(*b),
            other => serializer.serialize_str(&other.to_sql_text()),
        }
    }
}
