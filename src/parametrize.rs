//! Registering one test body once per resource endpoint.
//!
//! A [`TestFunction`] pairs a shared body with its own metadata (identity,
//! display name, default arguments). [`TestFunction::duplicate`] produces an
//! independent registration: renaming or re-binding the copy never affects
//! the original, while the body and everything it captured stay shared by
//! reference.
//!
//! [`ParametrizeBuilder`] uses that to expand one function over a
//! [`ResourceAddressRegistry`], yielding one [`TestRegistration`] per
//! (category, alias) pair.
//!
//! # Example
//! ```
//! use visa_harness::parametrize::{ParametrizeBuilder, TestFunction};
//! use visa_harness::registry::ResourceAddressRegistry;
//!
//! let read_idn = TestFunction::new("read_idn", |args| {
//!     assert!(args.get("address").is_some());
//!     Ok(())
//! });
//!
//! let tests = ParametrizeBuilder::new(read_idn)
//!     .over(ResourceAddressRegistry::builtin())
//!     .build();
//!
//! let names: Vec<_> = tests.iter().map(|t| t.name().to_string()).collect();
//! assert_eq!(
//!     names,
//!     vec!["read_idn[tcpip]", "read_idn[TCPIP::192.168.0.2::5025::SOCKET]"]
//! );
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::registry::{ResourceAddressRegistry, ResourceCase};

/// Named arguments handed to a test body.
pub type TestArgs = BTreeMap<String, String>;

/// The executable part of a test, shared between all of its copies.
pub type TestBody = Arc<dyn Fn(&TestArgs) -> anyhow::Result<()> + Send + Sync>;

/// A test body plus its own metadata bag.
pub struct TestFunction {
    id: Uuid,
    name: String,
    defaults: TestArgs,
    body: TestBody,
}

impl fmt::Debug for TestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFunction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl TestFunction {
    /// Wraps a body under a name.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TestArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            defaults: TestArgs::new(),
            body: Arc::new(body),
        }
    }

    /// Adds a default argument.
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Independent copy: fresh identity, own name and defaults, same body.
    pub fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            defaults: self.defaults.clone(),
            body: Arc::clone(&self.body),
        }
    }

    /// Copy under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut copy = self.duplicate();
        copy.name = name.into();
        copy
    }

    /// Unique identity of this registration.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Changes the display name of this copy only.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Default arguments of this copy.
    pub fn defaults(&self) -> &TestArgs {
        &self.defaults
    }

    /// Mutable access to the defaults of this copy only.
    pub fn defaults_mut(&mut self) -> &mut TestArgs {
        &mut self.defaults
    }

    /// `true` if both copies execute the same body.
    pub fn shares_body_with(&self, other: &TestFunction) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    /// Runs the body with the defaults overlaid by `args`.
    pub fn call(&self, args: &TestArgs) -> anyhow::Result<()> {
        let mut merged = self.defaults.clone();
        merged.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
        (self.body)(&merged)
    }

    /// Runs the body with the defaults only.
    pub fn call_with_defaults(&self) -> anyhow::Result<()> {
        (self.body)(&self.defaults)
    }
}

/// One entry of the expanded test set.
#[derive(Debug)]
pub struct TestRegistration {
    function: TestFunction,
    case: Option<ResourceCase>,
    check_no_warning: bool,
}

impl TestRegistration {
    /// Registration that is not bound to a resource.
    pub fn plain(function: TestFunction) -> Self {
        Self {
            function,
            case: None,
            check_no_warning: true,
        }
    }

    /// Permits this test to emit warnings.
    pub fn allow_warnings(mut self) -> Self {
        self.check_no_warning = false;
        self
    }

    /// Display name, `"{function}[{alias}]"` for parametrized entries.
    pub fn name(&self) -> &str {
        self.function.name()
    }

    /// Identity of the underlying copy.
    pub fn id(&self) -> Uuid {
        self.function.id()
    }

    /// Resource the test is bound to, if any.
    pub fn case(&self) -> Option<&ResourceCase> {
        self.case.as_ref()
    }

    /// Whether leaked warnings fail this test.
    pub fn check_no_warning(&self) -> bool {
        self.check_no_warning
    }

    /// The function copy backing this registration.
    pub fn function(&self) -> &TestFunction {
        &self.function
    }

    /// Runs the body with the bound arguments.
    pub fn run(&self) -> anyhow::Result<()> {
        self.function.call_with_defaults()
    }
}

/// Expands one test function over registry cases.
#[derive(Debug)]
pub struct ParametrizeBuilder {
    function: TestFunction,
    cases: Vec<ResourceCase>,
    check_no_warning: bool,
}

impl ParametrizeBuilder {
    /// Starts from the function to expand.
    pub fn new(function: TestFunction) -> Self {
        Self {
            function,
            cases: Vec::new(),
            check_no_warning: true,
        }
    }

    /// Adds every case of `registry`, in table order.
    pub fn over(mut self, registry: &ResourceAddressRegistry) -> Self {
        self.cases.extend(registry.cases());
        self
    }

    /// Adds only the listed categories; unregistered ones are skipped.
    pub fn over_categories(mut self, registry: &ResourceAddressRegistry, categories: &[&str]) -> Self {
        self.cases.extend(
            registry
                .cases()
                .filter(|case| categories.contains(&case.category.as_str())),
        );
        self
    }

    /// Adds a single case.
    pub fn case(mut self, case: ResourceCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Generated registrations permit warnings.
    pub fn allow_warnings(mut self) -> Self {
        self.check_no_warning = false;
        self
    }

    /// One registration per case, each on its own copy of the function.
    pub fn build(self) -> Vec<TestRegistration> {
        self.cases
            .into_iter()
            .map(|case| {
                let mut function = self
                    .function
                    .renamed(format!("{}[{}]", self.function.name(), case.alias));
                let defaults = function.defaults_mut();
                defaults.insert("category".into(), case.category.clone());
                defaults.insert("address".into(), case.address.clone());
                defaults.insert("alias".into(), case.alias.clone());

                TestRegistration {
                    function,
                    case: Some(case),
                    check_no_warning: self.check_no_warning,
                }
            })
            .collect()
    }
}
