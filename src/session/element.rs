//! Element reference implementation
//!
//! DOM elements resolved to remote objects; geometry and markup are read with
//! `Runtime.callFunctionOn` against the resolved node.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::cdp::{CdpClient, EvaluationResult};
use crate::session::traits::{BoundingBox, ElementRef};
use crate::Error;

const BOUNDING_BOX_FN: &str = r#"function() {
    if (!this.isConnected) { return null; }
    const r = this.getBoundingClientRect();
    return {
        x: r.left + window.scrollX,
        y: r.top + window.scrollY,
        width: r.width,
        height: r.height
    };
}"#;

const IS_VISIBLE_FN: &str = r#"function() {
    if (!this.isConnected) { return false; }
    const style = window.getComputedStyle(this);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') {
        return false;
    }
    return this.getClientRects().length > 0;
}"#;

/// Element reference implementation
#[derive(Debug)]
pub struct ElementRefImpl {
    node_id: i64,
    object_id: String,
    selector: String,
    cdp_client: Arc<dyn CdpClient>,
}

impl ElementRefImpl {
    pub fn new(node_id: i64, object_id: String, selector: String, cdp_client: Arc<dyn CdpClient>) -> Self {
        Self {
            node_id,
            object_id,
            selector,
            cdp_client,
        }
    }

    /// Run `DOM.querySelectorAll` under `root_node_id` and resolve every match
    pub(crate) async fn query_all(
        cdp_client: &Arc<dyn CdpClient>,
        root_node_id: i64,
        selector: &str,
    ) -> Result<Vec<Arc<dyn ElementRef>>, Error> {
        let result = cdp_client
            .call_method(
                "DOM.querySelectorAll",
                json!({ "nodeId": root_node_id, "selector": selector }),
            )
            .await?;

        let node_ids: Vec<i64> = result
            .get("nodeIds")
            .and_then(|v| v.as_array())
            .map(|ids| ids.iter().filter_map(|id| id.as_i64()).collect())
            .unwrap_or_default();

        let mut elements: Vec<Arc<dyn ElementRef>> = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let resolved = cdp_client
                .call_method("DOM.resolveNode", json!({ "nodeId": node_id }))
                .await?;

            match resolved
                .get("object")
                .and_then(|o| o.get("objectId"))
                .and_then(|id| id.as_str())
            {
                Some(object_id) => elements.push(Arc::new(ElementRefImpl::new(
                    node_id,
                    object_id.to_string(),
                    selector.to_string(),
                    Arc::clone(cdp_client),
                ))),
                None => tracing::debug!("Node {} for '{}' could not be resolved", node_id, selector),
            }
        }

        Ok(elements)
    }

    async fn call(&self, function_declaration: &str) -> Result<EvaluationResult, Error> {
        self.cdp_client
            .call_function_on(&self.object_id, function_declaration)
            .await
    }
}

#[async_trait]
impl ElementRef for ElementRefImpl {
    fn selector(&self) -> &str {
        &self.selector
    }

    async fn is_visible(&self) -> Result<bool, Error> {
        Ok(self.call(IS_VISIBLE_FN).await?.as_bool().unwrap_or(false))
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>, Error> {
        match self.call(BOUNDING_BOX_FN).await? {
            EvaluationResult::Object(value) => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }

    async fn outer_html(&self) -> Result<String, Error> {
        match self.call("function() { return this.outerHTML; }").await? {
            EvaluationResult::String(html) => Ok(html),
            _ => Err(Error::script_execution_failed("Failed to get element HTML")),
        }
    }

    async fn inner_html(&self) -> Result<String, Error> {
        match self.call("function() { return this.innerHTML; }").await? {
            EvaluationResult::String(html) => Ok(html),
            _ => Err(Error::script_execution_failed("Failed to get element HTML")),
        }
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementRef>>, Error> {
        Self::query_all(&self.cdp_client, self.node_id, selector).await
    }

    async fn click(&self) -> Result<(), Error> {
        self.call("function() { this.click(); }").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{CdpClientImpl, MockCdpConnection};

    fn client_with(connection: &Arc<MockCdpConnection>) -> Arc<dyn CdpClient> {
        Arc::new(CdpClientImpl::new(connection.clone()))
    }

    #[tokio::test]
    async fn test_query_all_resolves_each_node() {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond("DOM.querySelectorAll", json!({ "nodeIds": [11, 12] }));
        connection.respond_with("DOM.resolveNode", |params| {
            Ok(json!({ "object": { "type": "object", "objectId": format!("obj-{}", params["nodeId"]) } }))
        });

        let client = client_with(&connection);
        let elements = ElementRefImpl::query_all(&client, 1, "header").await.unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].selector(), "header");
        assert_eq!(
            connection.last_params("DOM.resolveNode").unwrap()["nodeId"],
            12
        );
    }

    #[tokio::test]
    async fn test_bounding_box_in_document_coordinates() {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond(
            "Runtime.callFunctionOn",
            json!({ "result": { "type": "object", "value": { "x": 0.0, "y": 3800.0, "width": 1280.0, "height": 200.0 } } }),
        );

        let element = ElementRefImpl::new(5, "obj-5".to_string(), "footer".to_string(), client_with(&connection));
        let bbox = element.bounding_box().await.unwrap().unwrap();

        assert_eq!(bbox.bottom(), 4000.0);
        assert_eq!(
            connection.last_params("Runtime.callFunctionOn").unwrap()["objectId"],
            "obj-5"
        );
    }

    #[tokio::test]
    async fn test_detached_node_has_no_box() {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond(
            "Runtime.callFunctionOn",
            json!({ "result": { "type": "object", "subtype": "null", "value": null } }),
        );

        let element = ElementRefImpl::new(5, "obj-5".to_string(), "nav".to_string(), client_with(&connection));
        assert!(element.bounding_box().await.unwrap().is_none());
    }
}
