use crate::{
    runtime::Error,
    vm::value::{ConversionError, Value},
};

#[derive(Debug, Default, Clone)]
pub struct Stack {
    inner: Vec<Value>,
}

impl Stack {
    pub fn pop(&mut self) -> Option<Value> {
        self.inner.pop()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.inner.push(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.inner.last()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Value> {
        self.inner.iter()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.inner
    }

    pub fn check_size(&self, size: usize) -> Result<(), Error> {
        if self.len() < size {
            Err(Error::InsufficientArguments {
                needed: size,
                found: self.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Pops the argument at position `index` of a native call, converting it
    /// to the type the native expects. Callers check the stack size first and
    /// pop the last argument first.
    pub fn pop_arg<T>(&mut self, index: usize) -> Result<T, Error>
    where
        T: TryFrom<Value, Error = ConversionError>,
    {
        let value = self.pop().ok_or(Error::InsufficientArguments {
            needed: index + 1,
            found: 0,
        })?;
        T::try_from(value).map_err(|source| Error::InvalidArgument { index, source })
    }

    pub fn pop_any(&mut self, index: usize) -> Result<Value, Error> {
        self.pop().ok_or(Error::InsufficientArguments {
            needed: index + 1,
            found: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_arg_converts_and_reports_index() {
        let mut stack = Stack::default();
        stack.push(1i64);
        stack.push("two");

        let err = stack.pop_arg::<i64>(1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { index: 1, .. }));
        assert_eq!(stack.pop_arg::<i64>(0).unwrap(), 1);
        assert!(stack.is_empty());
    }

    #[test]
    fn check_size_reports_shortfall() {
        let mut stack = Stack::default();
        stack.push(true);
        assert!(stack.check_size(1).is_ok());
        assert!(matches!(
            stack.check_size(3),
            Err(Error::InsufficientArguments {
                needed: 3,
                found: 1
            })
        ));
    }
}
