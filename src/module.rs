mod catalog;
mod metadata;
mod module_ref;

pub use catalog::*;
pub use metadata::*;
pub use module_ref::*;

/// Defines [`ModuleMetadata`] using a domain specific language.
///
/// # Example
///
/// ```
/// use scoped_injector::{define_module, Identifier, Provider, TypeDefinition};
///
/// struct Mailer;
/// struct Templates;
/// struct MailModule;
///
/// let metadata = define_module! {
///     imports = [Identifier::of::<MailModule>()],
///     providers = [
///         Provider::constructor(TypeDefinition::new(|_| Ok(Mailer))),
///         Provider::constructor(TypeDefinition::new(|_| Ok(Templates))),
///     ],
///     exports = [Identifier::of::<Mailer>()],
/// };
///
/// assert_eq!(1, metadata.imports().len());
/// assert_eq!(2, metadata.providers().len());
/// assert!(metadata.controllers().is_empty());
/// ```
#[macro_export]
macro_rules! define_module {
    {
        $($key:tt = $value:tt),*
        $(,)?
    } => {
        {
            #[allow(unused_mut)]
            let mut metadata = <$crate::ModuleMetadata as ::std::default::Default>::default();
            $($crate::define_module!(@add metadata, $key = $value);)*
            metadata
        }
    };
    (
        @add $metadata:ident,
        imports = [
            $($import:expr),*
            $(,)?
        ]
    ) => {
        $($metadata = $metadata.import($import);)*
    };
    (
        @add $metadata:ident,
        providers = [
            $($provider:expr),*
            $(,)?
        ]
    ) => {
        $($metadata = $metadata.provider($provider);)*
    };
    (
        @add $metadata:ident,
        controllers = [
            $($controller:expr),*
            $(,)?
        ]
    ) => {
        $($metadata = $metadata.controller($controller);)*
    };
    (
        @add $metadata:ident,
        exports = [
            $($export:expr),*
            $(,)?
        ]
    ) => {
        $($metadata = $metadata.export($export);)*
    };
}
