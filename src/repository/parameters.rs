//! Parsers, parameter groups and parameters of script versions

use sqlx::{Pool, Postgres};

use super::scripts::free_slug;
use crate::{
    error::AppResult,
    models::parameter::{ParameterSignature, ScriptParameter, ScriptParameterGroup, ScriptParser},
};

#[derive(Clone)]
pub struct ParametersRepository {
    pool: Pool<Postgres>,
}

impl ParametersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn parsers_for_version(&self, version_id: i32) -> AppResult<Vec<ScriptParser>> {
        let parsers = sqlx::query_as::<_, ScriptParser>(
            r#"
            SELECT p.id, p.name FROM script_parsers p
            JOIN script_parser_versions pv ON pv.script_parser_id = p.id
            WHERE pv.script_version_id = $1
            ORDER BY p.id
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(parsers)
    }

    pub async fn groups_for_version(&self, version_id: i32) -> AppResult<Vec<ScriptParameterGroup>> {
        let groups = sqlx::query_as::<_, ScriptParameterGroup>(
            r#"
            SELECT g.id, g.group_name, g.hidden FROM script_parameter_groups g
            JOIN script_parameter_group_versions gv ON gv.script_parameter_group_id = g.id
            WHERE gv.script_version_id = $1
            ORDER BY g.id
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    /// Parameters of a version in `(param_order, id)` order
    pub async fn parameters_for_version(&self, version_id: i32) -> AppResult<Vec<ScriptParameter>> {
        let params = sqlx::query_as::<_, ScriptParameter>(
            r#"
            SELECT sp.* FROM script_parameters sp
            JOIN script_parameter_versions spv ON spv.script_parameter_id = sp.id
            WHERE spv.script_version_id = $1
            ORDER BY sp.param_order, sp.id
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(params)
    }

    pub async fn create_parser(&self, name: &str, version_id: i32) -> AppResult<ScriptParser> {
        let parser = sqlx::query_as::<_, ScriptParser>("INSERT INTO script_parsers (name) VALUES ($1) RETURNING id, name")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        self.link_parser(parser.id, version_id).await?;
        Ok(parser)
    }

    pub async fn link_parser(&self, parser_id: i32, version_id: i32) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO script_parser_versions (script_parser_id, script_version_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(parser_id)
        .bind(version_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_group(&self, name: &str, hidden: bool, version_id: i32) -> AppResult<ScriptParameterGroup> {
        let group = sqlx::query_as::<_, ScriptParameterGroup>(
            "INSERT INTO script_parameter_groups (group_name, hidden) VALUES ($1, $2) RETURNING id, group_name, hidden",
        )
        .bind(name)
        .bind(hidden)
        .fetch_one(&self.pool)
        .await?;
        self.link_group(group.id, version_id).await?;
        Ok(group)
    }

    pub async fn link_group(&self, group_id: i32, version_id: i32) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO script_parameter_group_versions (script_parameter_group_id, script_version_id)
            VALUES ($1, $2) ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(version_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a parameter with a slug unique across all parameters
    pub async fn create_parameter(
        &self,
        signature: &ParameterSignature,
        parser_id: i32,
        group_id: i32,
        param_order: i16,
        version_id: i32,
    ) -> AppResult<ScriptParameter> {
        let slug = free_slug(&self.pool, "script_parameters", &signature.script_param).await?;
        let param = sqlx::query_as::<_, ScriptParameter>(
            r#"
            INSERT INTO script_parameters (
                parser_id, short_param, script_param, slug, is_output, required, choices,
                choice_limit, collapse_arguments, form_field, default_value, input_type,
                param_help, is_checked, hidden, parameter_group_id, param_order
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(parser_id)
        .bind(&signature.short_param)
        .bind(&signature.script_param)
        .bind(&slug)
        .bind(signature.is_output)
        .bind(signature.required)
        .bind(&signature.choices)
        .bind(&signature.choice_limit)
        .bind(signature.collapse_arguments)
        .bind(signature.form_field)
        .bind(&signature.default_value)
        .bind(&signature.input_type)
        .bind(&signature.param_help)
        .bind(signature.is_checked)
        .bind(signature.hidden)
        .bind(group_id)
        .bind(param_order)
        .fetch_one(&self.pool)
        .await?;
        self.link_parameter(param.id, version_id).await?;
        Ok(param)
    }

    /// Share an existing parameter with another version
    pub async fn link_parameter(&self, parameter_id: i32, version_id: i32) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO script_parameter_versions (script_parameter_id, script_version_id)
            VALUES ($1, $2) ON CONFLICT DO NOTHING
            "#,
        )
        .bind(parameter_id)
        .bind(version_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
