//! Internal macros for asp-schema

/// ## Motivation
///
/// Agent Spaces deals with a lot of "string-like" types: a channel name like
/// `stable`, a plugin name, a harness id. Declaring all of these as plain
/// `String` makes it easy to pass the wrong one to the wrong place.
///
/// This macro declares a "strongly-typed string": an owned `Foo` and a
/// borrowed `&FooRef`, linked together with the usual `From`/`AsRef`/`Deref`
/// impls, for values that have no validation beyond "is a string".
///
/// Types with actual grammar (space ids, commit shas, integrities) are
/// hand-rolled instead, with fallible constructors — see `ids.rs`.
#[macro_export]
macro_rules! declare_strongly_typed_string {
    ($(
        $(#[$attr:meta])*
        $vis:vis struct $name:ident => &$ref_name:ident;
    )+) => {
        $(
            #[derive(Clone, Hash, PartialEq, Eq, Ord, PartialOrd)]
            #[derive(serde::Serialize, serde::Deserialize)]
            #[derive(schemars::JsonSchema)]
            #[serde(transparent)]
            #[repr(transparent)]
            $(#[$attr])*
            pub struct $name(String);

            #[automatically_derived]
            impl $name {
                /// Constructs a new strongly-typed value
                #[inline]
                pub fn new(raw: impl Into<String>) -> Self {
                    Self(raw.into())
                }

                /// Views this value as its ref type
                #[inline]
                pub fn as_ref_type(&self) -> &$ref_name {
                    $ref_name::from_str(&self.0)
                }

                /// Views this value as a string slice
                #[inline]
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            #[automatically_derived]
            impl ::std::convert::AsRef<str> for $name {
                #[inline]
                fn as_ref(&self) -> &str {
                    self.as_str()
                }
            }

            #[automatically_derived]
            impl ::std::str::FromStr for $name {
                type Err = ::std::convert::Infallible;
                #[inline]
                fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                    ::std::result::Result::Ok($name::new(s))
                }
            }

            #[automatically_derived]
            impl ::std::ops::Deref for $name {
                type Target = $ref_name;
                #[inline]
                fn deref(&self) -> &Self::Target {
                    $ref_name::from_str(self.0.as_str())
                }
            }

            #[automatically_derived]
            impl ::std::fmt::Debug for $name {
                #[inline]
                fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                    <str as ::std::fmt::Debug>::fmt(&self.0, f)
                }
            }

            #[automatically_derived]
            impl ::std::fmt::Display for $name {
                #[inline]
                fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                    <str as ::std::fmt::Display>::fmt(&self.0, f)
                }
            }

            #[repr(transparent)]
            #[derive(Hash, PartialEq, Eq, PartialOrd, Ord)]
            $(#[$attr])*
            pub struct $ref_name(str);

            #[automatically_derived]
            impl $ref_name {
                #[allow(unsafe_code)]
                #[inline]
                #[doc = "Transparently reinterprets the string slice as a strongly-typed ref"]
                pub fn from_str(raw: &str) -> &Self {
                    let ptr: *const str = raw;
                    // SAFETY: Self is #[repr(transparent)] around a single str field
                    unsafe { &*(ptr as *const Self) }
                }

                /// Provides access to the underlying value as a string slice.
                #[inline]
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            #[automatically_derived]
            impl ::std::fmt::Debug for $ref_name {
                #[inline]
                fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                    <str as ::std::fmt::Debug>::fmt(&self.0, f)
                }
            }

            #[automatically_derived]
            impl ::std::fmt::Display for $ref_name {
                #[inline]
                fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                    <str as ::std::fmt::Display>::fmt(&self.0, f)
                }
            }
        )+
    };
}
