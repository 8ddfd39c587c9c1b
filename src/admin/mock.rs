//! In-memory admin collection for tests.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::admin::{AdminClient, DomainInfo, PowerState, VmKind};
use crate::error::MenuError;

#[derive(Debug, Clone)]
pub struct MockDomain {
    pub info: DomainInfo,
    pub power: PowerState,
    pub networked: bool,
    pub features: BTreeMap<String, String>,
}

#[derive(Default)]
struct Inner {
    domains: BTreeMap<String, MockDomain>,
    /// When set, every feature query fails; used to exercise the
    /// dispatcher's error boundary.
    fail_features: bool,
}

#[derive(Default)]
pub struct MockAdmin {
    inner: RefCell<Inner>,
}

impl MockAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_domain(&self, name: &str, klass: VmKind, icon: &str) {
        let info = DomainInfo {
            name: name.to_string(),
            klass,
            icon: icon.to_string(),
            template: None,
            template_for_dispvms: false,
        };
        self.inner.borrow_mut().domains.insert(
            name.to_string(),
            MockDomain {
                info,
                power: PowerState::Halted,
                networked: false,
                features: BTreeMap::new(),
            },
        );
    }

    pub fn remove_domain(&self, name: &str) {
        self.inner.borrow_mut().domains.remove(name);
    }

    pub fn set_template(&self, name: &str, template: Option<&str>) {
        if let Some(d) = self.inner.borrow_mut().domains.get_mut(name) {
            d.info.template = template.map(str::to_string);
        }
    }

    pub fn set_icon(&self, name: &str, icon: &str) {
        if let Some(d) = self.inner.borrow_mut().domains.get_mut(name) {
            d.info.icon = icon.to_string();
        }
    }

    pub fn set_power(&self, name: &str, state: PowerState) {
        if let Some(d) = self.inner.borrow_mut().domains.get_mut(name) {
            d.power = state;
        }
    }

    pub fn set_networked(&self, name: &str, networked: bool) {
        if let Some(d) = self.inner.borrow_mut().domains.get_mut(name) {
            d.networked = networked;
        }
    }

    pub fn set_feature(&self, name: &str, feature: &str, value: &str) {
        if let Some(d) = self.inner.borrow_mut().domains.get_mut(name) {
            d.features.insert(feature.to_string(), value.to_string());
        }
    }

    pub fn remove_feature(&self, name: &str, feature: &str) {
        if let Some(d) = self.inner.borrow_mut().domains.get_mut(name) {
            d.features.remove(feature);
        }
    }

    pub fn fail_features(&self, fail: bool) {
        self.inner.borrow_mut().fail_features = fail;
    }
}

impl AdminClient for MockAdmin {
    fn local_name(&self) -> String {
        "dom0".to_string()
    }

    fn domain_names(&self) -> Result<Vec<String>, MenuError> {
        Ok(self.inner.borrow().domains.keys().cloned().collect())
    }

    fn domain_info(&self, name: &str) -> Result<Option<DomainInfo>, MenuError> {
        Ok(self
            .inner
            .borrow()
            .domains
            .get(name)
            .map(|d| d.info.clone()))
    }

    fn power_state(&self, name: &str) -> Result<PowerState, MenuError> {
        Ok(self
            .inner
            .borrow()
            .domains
            .get(name)
            .map(|d| d.power)
            .unwrap_or(PowerState::Halted))
    }

    fn is_networked(&self, name: &str) -> Result<bool, MenuError> {
        Ok(self
            .inner
            .borrow()
            .domains
            .get(name)
            .map(|d| d.networked)
            .unwrap_or(false))
    }

    fn feature(&self, name: &str, feature: &str) -> Result<Option<String>, MenuError> {
        let inner = self.inner.borrow();
        if inner.fail_features {
            return Err(MenuError::Admin("injected feature failure".to_string()));
        }
        Ok(inner
            .domains
            .get(name)
            .and_then(|d| d.features.get(feature))
            .cloned())
    }
}
